//! Content keys: one-time generation and per-recipient wrapping with age X25519

use age::x25519;
use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::identity::IdentityKeyPair;
use crate::KEY_SIZE;

/// A one-time 256-bit content encryption key. Zeroized on drop.
#[derive(Clone)]
pub struct ContentKey {
    bytes: [u8; KEY_SIZE],
}

impl ContentKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for ContentKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a fresh random 256-bit content key.
///
/// Draws directly from the OS RNG so an entropy failure surfaces as
/// `KeyGeneration` instead of a panic.
pub fn generate_content_key() -> CryptoResult<ContentKey> {
    let mut bytes = [0u8; KEY_SIZE];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CryptoError::KeyGeneration(format!("OS RNG: {e}")))?;
    Ok(ContentKey::from_bytes(bytes))
}

/// Wrap (encrypt) a content key to a recipient's age X25519 public key.
///
/// Only ever used for the 32-byte content key, never for bulk data.
/// Output is the binary age format.
pub fn wrap_content_key(key: &ContentKey, recipient_public_key: &str) -> CryptoResult<Vec<u8>> {
    let recipient: x25519::Recipient = recipient_public_key
        .trim()
        .parse()
        .map_err(|e| CryptoError::InvalidKey(format!("recipient public key: {e}")))?;

    age::encrypt(&recipient, key.as_bytes())
        .map_err(|e| CryptoError::Encryption(format!("key wrapping failed: {e}")))
}

/// Unwrap (decrypt) a content key with the recipient's identity.
///
/// Every failure, including a well-formed key of the wrong size, maps to the
/// opaque `Decryption` error.
pub fn unwrap_content_key(wrapped: &[u8], identity: &IdentityKeyPair) -> CryptoResult<ContentKey> {
    let mut plaintext =
        age::decrypt(identity.age_identity(), wrapped).map_err(|_| CryptoError::Decryption)?;

    if plaintext.len() != KEY_SIZE {
        plaintext.zeroize();
        return Err(CryptoError::Decryption);
    }

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    Ok(ContentKey::from_bytes(key_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_key_generation() {
        let k1 = generate_content_key().unwrap();
        let k2 = generate_content_key().unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_key_wrap_unwrap_roundtrip() {
        let identity = IdentityKeyPair::generate().unwrap();
        let key = generate_content_key().unwrap();

        let wrapped = wrap_content_key(&key, identity.public_key()).unwrap();
        let unwrapped = unwrap_content_key(&wrapped, &identity).unwrap();

        assert_eq!(key.as_bytes(), unwrapped.as_bytes());
    }

    #[test]
    fn test_key_unwrap_wrong_identity() {
        let alice = IdentityKeyPair::generate().unwrap();
        let mallory = IdentityKeyPair::generate().unwrap();
        let key = generate_content_key().unwrap();

        let wrapped = wrap_content_key(&key, alice.public_key()).unwrap();
        let result = unwrap_content_key(&wrapped, &mallory);

        assert!(matches!(result, Err(CryptoError::Decryption)));
    }

    #[test]
    fn test_wrap_rejects_malformed_public_key() {
        let key = generate_content_key().unwrap();
        let result = wrap_content_key(&key, "age1notakey");
        assert!(matches!(result, Err(CryptoError::InvalidKey(_))));
    }

    #[test]
    fn test_wrapped_keys_differ_per_call() {
        let identity = IdentityKeyPair::generate().unwrap();
        let key = generate_content_key().unwrap();

        let w1 = wrap_content_key(&key, identity.public_key()).unwrap();
        let w2 = wrap_content_key(&key, identity.public_key()).unwrap();

        // age uses a fresh ephemeral share per wrap
        assert_ne!(w1, w2);
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = ContentKey::from_bytes([7u8; KEY_SIZE]);
        let shown = format!("{key:?}");
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains('7'));
    }
}
