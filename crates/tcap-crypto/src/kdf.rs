//! Argon2id key derivation: capsule passwords and identity backup keys

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::{KEY_SIZE, SALT_SIZE};

/// Argon2id parameters for KDF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    /// Cheap parameters for tests and interactive tooling on constrained hosts.
    pub fn interactive() -> Self {
        Self {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

/// Salted Argon2id digest of a capsule password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordDigest {
    #[serde(with = "crate::encoding::base64_bytes")]
    pub hash: Vec<u8>,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub salt: Vec<u8>,
    pub params: KdfParams,
}

impl std::fmt::Debug for PasswordDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordDigest")
            .field("hash", &"[REDACTED]")
            .field("salt_len", &self.salt.len())
            .field("params", &self.params)
            .finish()
    }
}

/// Derive a 256-bit key from a password and salt using Argon2id.
///
/// The salt does not need to be secret and is stored next to whatever the
/// key protects.
pub fn derive_key(
    password: &SecretString,
    salt: &[u8],
    params: &KdfParams,
) -> CryptoResult<Zeroizing<[u8; KEY_SIZE]>> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::Kdf(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, key.as_mut_slice())
        .map_err(|e| CryptoError::Kdf(format!("Argon2id KDF failed: {e}")))?;

    Ok(key)
}

/// Fill a fresh random salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Hash a password with Argon2id. A random salt is generated when none is given.
pub fn hash_password(
    password: &SecretString,
    salt: Option<&[u8]>,
    params: &KdfParams,
) -> CryptoResult<PasswordDigest> {
    let salt = match salt {
        Some(s) => s.to_vec(),
        None => generate_salt().to_vec(),
    };
    let hash = derive_key(password, &salt, params)?;

    Ok(PasswordDigest {
        hash: hash.to_vec(),
        salt,
        params: *params,
    })
}

/// Check a password attempt against a stored digest.
///
/// The final comparison is constant-time. A derivation failure (e.g. a
/// stored salt that Argon2 rejects) counts as a mismatch.
pub fn verify_password(password: &SecretString, digest: &PasswordDigest) -> bool {
    match derive_key(password, &digest.salt, &digest.params) {
        Ok(candidate) => candidate.as_slice().ct_eq(digest.hash.as_slice()).into(),
        Err(e) => {
            tracing::debug!("password verification could not derive key: {e}");
            false
        }
    }
}
