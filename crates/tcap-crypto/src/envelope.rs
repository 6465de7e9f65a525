//! Content Encryptor: seal one content item for many recipients
//!
//! Each content item gets exactly one content key and one `(ciphertext, iv)`
//! pair. The content key is then wrapped once per recipient, so a capsule
//! addressed to N people stores the payload once plus N small wrapped keys:
//!
//! ```text
//! EncryptedEnvelope {
//!     content_type,
//!     ciphertext, iv,                 ← shared by every recipient
//!     wrapped_keys: { recipient_id → age(content_key) },
//!     metadata,                       ← NOT encrypted
//! }
//! ```
//!
//! File metadata (name, MIME type, size) is stored in the clear next to the
//! ciphertext so listings can show it without a private key. Anyone who can
//! read the persisted capsule can read the metadata; only the content itself
//! is confidential.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::content::{decrypt_content, encrypt_content};
use crate::error::{CryptoError, CryptoResult};
use crate::identity::IdentityKeyPair;
use crate::keys::{generate_content_key, unwrap_content_key, wrap_content_key};

/// Kind of a content item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    File,
}

/// Descriptive file metadata, kept unencrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
}

/// One plaintext piece of capsule content. Never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentItem {
    pub kind: ContentKind,
    pub data: Vec<u8>,
    pub metadata: Option<FileMetadata>,
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: ContentKind::Text,
            data: text.into().into_bytes(),
            metadata: None,
        }
    }

    pub fn file(name: impl Into<String>, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        let metadata = FileMetadata {
            name: name.into(),
            mime_type: mime_type.into(),
            size: data.len() as u64,
        };
        Self {
            kind: ContentKind::File,
            data,
            metadata: Some(metadata),
        }
    }

    /// The content as UTF-8 text, if it is a text item.
    pub fn as_text(&self) -> Option<&str> {
        match self.kind {
            ContentKind::Text => std::str::from_utf8(&self.data).ok(),
            ContentKind::File => None,
        }
    }
}

impl std::fmt::Debug for ContentItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentItem")
            .field("kind", &self.kind)
            .field("len", &self.data.len())
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Who a content key gets wrapped for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientKey {
    pub id: String,
    /// age X25519 public key (`age1…`)
    pub public_key: String,
}

impl RecipientKey {
    pub fn new(id: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            public_key: public_key.into(),
        }
    }
}

/// Persisted, encrypted form of one content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    pub content_type: ContentKind,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "crate::encoding::base64_bytes")]
    pub iv: Vec<u8>,
    /// Content key wrapped for each recipient, keyed by recipient id
    #[serde(with = "crate::encoding::base64_map")]
    pub wrapped_keys: BTreeMap<String, Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FileMetadata>,
}

/// The per-(content item × recipient) view of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecipientEnvelope<'a> {
    pub recipient_id: &'a str,
    pub content_type: ContentKind,
    pub ciphertext: &'a [u8],
    pub iv: &'a [u8],
    pub wrapped_key: &'a [u8],
    pub metadata: Option<&'a FileMetadata>,
}

impl EncryptedEnvelope {
    /// Encrypt `item` once and wrap its content key for every recipient.
    pub fn seal(item: &ContentItem, recipients: &[RecipientKey]) -> CryptoResult<Self> {
        if recipients.is_empty() {
            return Err(CryptoError::Encryption(
                "content must be sealed for at least one recipient".into(),
            ));
        }

        let content_key = generate_content_key()?;
        let (ciphertext, iv) = encrypt_content(&item.data, &content_key)?;

        let mut wrapped_keys = BTreeMap::new();
        for recipient in recipients {
            let wrapped = wrap_content_key(&content_key, &recipient.public_key)?;
            if wrapped_keys.insert(recipient.id.clone(), wrapped).is_some() {
                return Err(CryptoError::Encryption(format!(
                    "duplicate recipient id: {}",
                    recipient.id
                )));
            }
        }

        Ok(Self {
            content_type: item.kind,
            ciphertext,
            iv: iv.to_vec(),
            wrapped_keys,
            metadata: item.metadata.clone(),
        })
    }

    /// Unwrap this recipient's key and decrypt the content.
    ///
    /// A missing wrapped key, a wrong identity and corrupted ciphertext are
    /// indistinguishable to the caller.
    pub fn open(&self, recipient_id: &str, identity: &IdentityKeyPair) -> CryptoResult<ContentItem> {
        let wrapped = self
            .wrapped_keys
            .get(recipient_id)
            .ok_or(CryptoError::Decryption)?;
        let content_key = unwrap_content_key(wrapped, identity)?;
        let data = decrypt_content(&self.ciphertext, &self.iv, &content_key)?;

        Ok(ContentItem {
            kind: self.content_type,
            data,
            metadata: self.metadata.clone(),
        })
    }

    /// View this envelope as the given recipient's entry.
    pub fn for_recipient(&self, recipient_id: &str) -> Option<RecipientEnvelope<'_>> {
        let (id, wrapped_key) = self.wrapped_keys.get_key_value(recipient_id)?;
        Some(RecipientEnvelope {
            recipient_id: id,
            content_type: self.content_type,
            ciphertext: &self.ciphertext,
            iv: &self.iv,
            wrapped_key,
            metadata: self.metadata.as_ref(),
        })
    }

    /// All per-recipient entries of this envelope.
    pub fn recipient_envelopes(&self) -> impl Iterator<Item = RecipientEnvelope<'_>> {
        self.wrapped_keys
            .iter()
            .map(move |(id, wrapped_key)| RecipientEnvelope {
                recipient_id: id,
                content_type: self.content_type,
                ciphertext: &self.ciphertext,
                iv: &self.iv,
                wrapped_key,
                metadata: self.metadata.as_ref(),
            })
    }
}

/// Seal a content item for `recipients` on the blocking pool.
pub async fn seal_for_recipients(
    item: ContentItem,
    recipients: Vec<RecipientKey>,
) -> CryptoResult<EncryptedEnvelope> {
    tokio::task::spawn_blocking(move || EncryptedEnvelope::seal(&item, &recipients)).await?
}

/// Open one envelope for a recipient on the blocking pool.
pub async fn open_for_recipient(
    envelope: EncryptedEnvelope,
    recipient_id: String,
    identity: IdentityKeyPair,
) -> CryptoResult<ContentItem> {
    tokio::task::spawn_blocking(move || envelope.open(&recipient_id, &identity)).await?
}

/// Best-effort decryption of several envelopes.
///
/// Items that fail to open are skipped and logged; the successfully decrypted
/// subset is returned in original order.
pub async fn open_all_for_recipient(
    envelopes: Vec<EncryptedEnvelope>,
    recipient_id: String,
    identity: IdentityKeyPair,
) -> CryptoResult<Vec<ContentItem>> {
    tokio::task::spawn_blocking(move || {
        envelopes
            .iter()
            .enumerate()
            .filter_map(|(index, envelope)| match envelope.open(&recipient_id, &identity) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(index, recipient = %recipient_id, "skipping undecryptable item: {e}");
                    None
                }
            })
            .collect()
    })
    .await
    .map_err(CryptoError::from)
}
