//! Identity key pairs (age X25519) and password-protected backups
//!
//! The public half is the `age1…` recipient string attached to capsules; the
//! private half never leaves this type unencrypted except through
//! [`IdentityKeyPair::secret_key`], which hands out a `SecretString`.

use age::x25519;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_key, generate_salt, KdfParams};
use crate::{KEY_SIZE, NONCE_SIZE};

/// Backup artifact format version
const BACKUP_VERSION: u32 = 1;

/// A user's asymmetric identity. Used only to wrap and unwrap content keys.
#[derive(Clone)]
pub struct IdentityKeyPair {
    identity: x25519::Identity,
    public_key: String,
}

impl IdentityKeyPair {
    /// Generate a new X25519 identity.
    ///
    /// age draws from the OS RNG and panics if it is unavailable; that panic is
    /// caught and reported as `KeyGeneration`.
    pub fn generate() -> CryptoResult<Self> {
        let identity = std::panic::catch_unwind(x25519::Identity::generate)
            .map_err(|_| CryptoError::KeyGeneration("OS RNG unavailable".into()))?;
        Ok(Self::from_identity(identity))
    }

    /// Load an identity from its `AGE-SECRET-KEY-1…` string.
    pub fn from_secret_key(secret: &SecretString) -> CryptoResult<Self> {
        let identity: x25519::Identity = secret
            .expose_secret()
            .trim()
            .parse()
            .map_err(|e| CryptoError::InvalidKey(format!("identity secret key: {e}")))?;
        Ok(Self::from_identity(identity))
    }

    fn from_identity(identity: x25519::Identity) -> Self {
        let public_key = identity.to_public().to_string();
        Self {
            identity,
            public_key,
        }
    }

    /// The `age1…` public key to hand to capsule creators.
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// The `AGE-SECRET-KEY-1…` string. Callers own keeping it inside their
    /// trust boundary.
    pub fn secret_key(&self) -> SecretString {
        self.identity.to_string()
    }

    pub(crate) fn age_identity(&self) -> &x25519::Identity {
        &self.identity
    }

    /// Encrypt the secret key under a password for export.
    pub fn export_backup(
        &self,
        password: &SecretString,
        params: &KdfParams,
    ) -> CryptoResult<IdentityBackup> {
        let salt = generate_salt();
        let key = derive_key(password, &salt, params)?;
        let key_bytes: &[u8; KEY_SIZE] = &key;
        let cipher = XChaCha20Poly1305::new(key_bytes.into());

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let secret = self.secret_key();
        let ciphertext = cipher
            .encrypt(nonce, secret.expose_secret().as_bytes())
            .map_err(|e| CryptoError::Encryption(format!("identity backup failed: {e}")))?;

        Ok(IdentityBackup {
            version: BACKUP_VERSION,
            public_key: self.public_key.clone(),
            kdf: *params,
            salt: salt.to_vec(),
            nonce: nonce_bytes.to_vec(),
            ciphertext,
        })
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &self.public_key)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Generate an identity on the blocking pool so async callers are not stalled.
pub async fn generate_identity_key_pair() -> CryptoResult<IdentityKeyPair> {
    tokio::task::spawn_blocking(IdentityKeyPair::generate).await?
}

/// Password-protected export of an identity, safe to store anywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityBackup {
    /// Backup format version
    pub version: u32,
    /// Public key of the wrapped identity (plaintext, for lookup)
    pub public_key: String,
    /// Argon2id parameters used for the wrapping key
    pub kdf: KdfParams,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub salt: Vec<u8>,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub nonce: Vec<u8>,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub ciphertext: Vec<u8>,
}

impl IdentityBackup {
    /// Decrypt the backup with its password.
    ///
    /// A wrong password and a corrupted artifact both yield `Decryption`. The
    /// restored identity must match the recorded public key.
    pub fn import(&self, password: &SecretString) -> CryptoResult<IdentityKeyPair> {
        if self.version != BACKUP_VERSION {
            return Err(CryptoError::InvalidKey(format!(
                "unsupported identity backup version {}",
                self.version
            )));
        }
        if self.nonce.len() != NONCE_SIZE {
            return Err(CryptoError::Decryption);
        }

        let key = derive_key(password, &self.salt, &self.kdf)?;
        let key_bytes: &[u8; KEY_SIZE] = &key;
        let cipher = XChaCha20Poly1305::new(key_bytes.into());
        let nonce = XNonce::from_slice(&self.nonce);

        let plaintext = Zeroizing::new(
            cipher
                .decrypt(nonce, self.ciphertext.as_ref())
                .map_err(|_| CryptoError::Decryption)?,
        );
        let secret = std::str::from_utf8(&plaintext).map_err(|_| CryptoError::Decryption)?;

        let restored = IdentityKeyPair::from_secret_key(&SecretString::from(secret))?;
        if restored.public_key() != self.public_key {
            return Err(CryptoError::InvalidKey(
                "backup public key does not match restored identity".into(),
            ));
        }
        Ok(restored)
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> CryptoResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CryptoError::Encryption(format!("backup serialization: {e}")))
    }

    /// Deserialize from JSON
    pub fn from_json(data: &str) -> CryptoResult<Self> {
        serde_json::from_str(data)
            .map_err(|e| CryptoError::InvalidKey(format!("backup deserialization: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_distinct_identities() {
        let a = IdentityKeyPair::generate().unwrap();
        let b = IdentityKeyPair::generate().unwrap();

        assert!(a.public_key().starts_with("age1"));
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn test_secret_key_reload() {
        let original = IdentityKeyPair::generate().unwrap();
        let reloaded = IdentityKeyPair::from_secret_key(&original.secret_key()).unwrap();

        assert_eq!(original.public_key(), reloaded.public_key());
    }

    #[test]
    fn test_from_secret_key_rejects_garbage() {
        let result = IdentityKeyPair::from_secret_key(&SecretString::from("AGE-SECRET-KEY-1NOPE"));
        assert!(matches!(result, Err(CryptoError::InvalidKey(_))));
    }

    #[test]
    fn test_backup_roundtrip() {
        let identity = IdentityKeyPair::generate().unwrap();
        let password = SecretString::from("backup-pass");

        let backup = identity
            .export_backup(&password, &KdfParams::interactive())
            .unwrap();
        let json = backup.to_json().unwrap();
        let restored = IdentityBackup::from_json(&json)
            .unwrap()
            .import(&password)
            .unwrap();

        assert_eq!(restored.public_key(), identity.public_key());
    }

    #[test]
    fn test_backup_wrong_password() {
        let identity = IdentityKeyPair::generate().unwrap();
        let backup = identity
            .export_backup(&SecretString::from("right"), &KdfParams::interactive())
            .unwrap();

        let result = backup.import(&SecretString::from("wrong"));
        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_backup_does_not_contain_secret() {
        let identity = IdentityKeyPair::generate().unwrap();
        let backup = identity
            .export_backup(&SecretString::from("pw"), &KdfParams::interactive())
            .unwrap();
        let json = backup.to_json().unwrap();

        assert!(!json.contains("AGE-SECRET-KEY"));
        assert!(json.contains(identity.public_key()));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let identity = IdentityKeyPair::generate().unwrap();
        let shown = format!("{identity:?}");
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains("AGE-SECRET-KEY"));
    }

    #[tokio::test]
    async fn test_async_generation() {
        let identity = generate_identity_key_pair().await.unwrap();
        assert!(identity.public_key().starts_with("age1"));
    }
}
