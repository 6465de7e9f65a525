//! Shamir threshold secret sharing over GF(256)
//!
//! A secret of any length is shared bytewise: for every byte a random
//! polynomial of degree `threshold - 1` is drawn with the secret byte as its
//! constant term, and share `x` holds the polynomial evaluated at `x`.
//! Any `threshold` shares recover the secret by Lagrange interpolation at 0;
//! fewer reveal nothing about it.
//!
//! Field arithmetic uses the AES reduction polynomial x^8 + x^4 + x^3 + x + 1.
//!
//! Encoded share format: `tcap-share-v1:{threshold}:{index}:{base64 value}`

use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::encoding::{b64_decode, b64_encode};
use crate::error::{CryptoError, CryptoResult};

const SHARE_PREFIX: &str = "tcap-share-v1";

/// One share of a split secret. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Share {
    /// Number of shares needed to recover the secret
    pub threshold: u8,
    /// Evaluation point, never 0
    pub index: u8,
    /// One field element per secret byte
    pub value: Vec<u8>,
}

impl Drop for Share {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Share")
            .field("threshold", &self.threshold)
            .field("index", &self.index)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl Share {
    pub fn encode(&self) -> String {
        format!(
            "{SHARE_PREFIX}:{}:{}:{}",
            self.threshold,
            self.index,
            b64_encode(&self.value)
        )
    }

    pub fn decode(encoded: &str) -> CryptoResult<Self> {
        let mut parts = encoded.trim().splitn(4, ':');
        let (Some(prefix), Some(threshold), Some(index), Some(value)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CryptoError::Sharing("malformed share".into()));
        };
        if prefix != SHARE_PREFIX {
            return Err(CryptoError::Sharing(format!("unknown share format: {prefix}")));
        }

        let threshold = threshold
            .parse()
            .map_err(|e| CryptoError::Sharing(format!("share threshold: {e}")))?;
        let index = index
            .parse()
            .map_err(|e| CryptoError::Sharing(format!("share index: {e}")))?;
        let value =
            b64_decode(value).map_err(|e| CryptoError::Sharing(format!("share value: {e}")))?;

        Ok(Self {
            threshold,
            index,
            value,
        })
    }
}

fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80;
        a <<= 1;
        if carry != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    product
}

/// Multiplicative inverse: a^254 == a^-1 for every non-zero a.
fn gf_inv(a: u8) -> u8 {
    let mut result = 1u8;
    let mut base = a;
    let mut exp = 254u8;
    while exp > 0 {
        if exp & 1 != 0 {
            result = gf_mul(result, base);
        }
        base = gf_mul(base, base);
        exp >>= 1;
    }
    result
}

/// Evaluate the polynomial with coefficients `coeffs` (constant term first) at `x`.
fn eval_poly(coeffs: &[u8], x: u8) -> u8 {
    coeffs
        .iter()
        .rev()
        .fold(0u8, |acc, &c| gf_mul(acc, x) ^ c)
}

/// Smallest accepted threshold
pub const MIN_THRESHOLD: u8 = 2;

/// Split `secret` into `share_count` shares, any `threshold` of which recover it.
///
/// `threshold` must be at least 2; a single-share threshold would hand every
/// trustee a plain copy of the secret.
pub fn split_secret(secret: &[u8], threshold: u8, share_count: u8) -> CryptoResult<Vec<Share>> {
    if threshold < MIN_THRESHOLD || threshold > share_count {
        return Err(CryptoError::Sharing(format!(
            "invalid parameters: threshold={threshold}, shares={share_count}"
        )));
    }
    if secret.is_empty() {
        return Err(CryptoError::Sharing("secret must not be empty".into()));
    }

    let mut rng = rand::thread_rng();
    let mut shares: Vec<Share> = (1..=share_count)
        .map(|index| Share {
            threshold,
            index,
            value: Vec::with_capacity(secret.len()),
        })
        .collect();

    let mut coeffs = Zeroizing::new(vec![0u8; threshold as usize]);
    for &byte in secret {
        coeffs[0] = byte;
        rng.fill_bytes(&mut coeffs[1..]);
        for share in shares.iter_mut() {
            share.value.push(eval_poly(&coeffs, share.index));
        }
    }

    Ok(shares)
}

/// Recover a secret from at least `threshold` shares of the same split.
pub fn combine_shares(shares: &[Share]) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let first = shares
        .first()
        .ok_or_else(|| CryptoError::Sharing("no shares given".into()))?;
    let threshold = first.threshold as usize;
    let len = first.value.len();

    if threshold < MIN_THRESHOLD as usize || shares.len() < threshold {
        return Err(CryptoError::Sharing(format!(
            "need {threshold} shares, got {}",
            shares.len()
        )));
    }

    let used = &shares[..threshold];
    for (i, share) in used.iter().enumerate() {
        if share.index == 0 {
            return Err(CryptoError::Sharing("share index 0 is invalid".into()));
        }
        if share.threshold as usize != threshold || share.value.len() != len {
            return Err(CryptoError::Sharing("shares come from different splits".into()));
        }
        if used[..i].iter().any(|other| other.index == share.index) {
            return Err(CryptoError::Sharing(format!(
                "duplicate share index {}",
                share.index
            )));
        }
    }

    // Lagrange basis at x = 0: l_i = prod_{j != i} x_j / (x_j - x_i)
    let basis: Vec<u8> = used
        .iter()
        .map(|si| {
            let (num, den) = used
                .iter()
                .filter(|sj| sj.index != si.index)
                .fold((1u8, 1u8), |(num, den), sj| {
                    (gf_mul(num, sj.index), gf_mul(den, sj.index ^ si.index))
                });
            gf_mul(num, gf_inv(den))
        })
        .collect();

    let mut secret = Zeroizing::new(vec![0u8; len]);
    for (pos, out) in secret.iter_mut().enumerate() {
        *out = used
            .iter()
            .zip(&basis)
            .fold(0u8, |acc, (share, &l)| acc ^ gf_mul(share.value[pos], l));
    }

    Ok(secret)
}
