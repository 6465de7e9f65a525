//! tcap-crypto: capsule encryption for the tcap time-capsule vault
//!
//! Architecture: hybrid encryption, one payload shared by every recipient
//!
//! ```text
//! Content Item ──► Content Key (256-bit random, one per item)
//!                    │
//!                    ├── Content AEAD: XChaCha20-Poly1305 (key=content_key, iv=random_192bit)
//!                    │     → (ciphertext, iv) stored ONCE per item
//!                    │
//!                    └── Key wrap: age X25519, once per recipient
//!                          → wrapped_keys[recipient_id]
//!
//! Identity Key Pair: age X25519 (age1… / AGE-SECRET-KEY-1…)
//!   └── Backup: Argon2id(password) → XChaCha20-Poly1305(secret key string)
//!
//! Password conditions: Argon2id(password, salt) compared in constant time
//! ```

pub mod content;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod kdf;
pub mod keys;
pub mod sharing;

pub use content::{decrypt_content, encrypt_content};
pub use envelope::{
    open_all_for_recipient, open_for_recipient, seal_for_recipients, ContentItem, ContentKind,
    EncryptedEnvelope, FileMetadata, RecipientEnvelope, RecipientKey,
};
pub use error::{CryptoError, CryptoResult};
pub use identity::{generate_identity_key_pair, IdentityBackup, IdentityKeyPair};
pub use kdf::{hash_password, verify_password, KdfParams, PasswordDigest};
pub use keys::{generate_content_key, unwrap_content_key, wrap_content_key, ContentKey};
pub use sharing::{combine_shares, split_secret, Share};

/// Size of a content key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a freshly generated Argon2id salt
pub const SALT_SIZE: usize = 16;
