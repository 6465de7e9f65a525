//! Content AEAD: XChaCha20-Poly1305 with a fresh random IV per call
//!
//! Stored form:
//! ```text
//! iv         = 24 random bytes (192-bit XChaCha nonce)
//! ciphertext = [N bytes: encrypted content][16 bytes: Poly1305 tag]
//! ```
//!
//! The 192-bit nonce is wide enough that random generation never needs
//! coordination: an IV collision under one key is negligible even across
//! billions of calls.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::ContentKey;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Encrypt content with XChaCha20-Poly1305.
///
/// Returns `(ciphertext, iv)`. A new IV is drawn for every call.
pub fn encrypt_content(
    plaintext: &[u8],
    key: &ContentKey,
) -> CryptoResult<(Vec<u8>, [u8; NONCE_SIZE])> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let mut iv = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut iv);
    let nonce = XNonce::from_slice(&iv);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| CryptoError::Encryption(format!("content encryption failed: {e}")))?;

    Ok((ciphertext, iv))
}

/// Decrypt content produced by [`encrypt_content`].
///
/// A malformed IV, a truncated ciphertext, the wrong key and a failed tag
/// check are all reported as `Decryption`.
pub fn decrypt_content(ciphertext: &[u8], iv: &[u8], key: &ContentKey) -> CryptoResult<Vec<u8>> {
    if iv.len() != NONCE_SIZE || ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::Decryption);
    }

    let nonce = XNonce::from_slice(iv);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::Decryption)
}
