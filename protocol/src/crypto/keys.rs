//! # Key Management
//!
//! Baby Jubjub private and public keys for rollup accounts.
//!
//! A private key is 32 random bytes. The signing scalar is derived from it
//! the way EdDSA always does: hash, clamp, and keep the top half of the
//! digest around as the nonce seed. The public key `A = s * B8` is a curve
//! point whose two coordinates go straight into the account's leaf
//! commitment as `ax` and `ay`.
//!
//! ## Security considerations
//!
//! - Key generation uses `OsRng`.
//! - `PrivateKey` does not implement `Serialize` and its `Debug` output is
//!   redacted. Exporting key material is always an explicit `to_hex()` call.
//! - Key bytes are never logged.

use std::fmt;
use std::str::FromStr;

use blake_hash::{Blake512, Digest};
use num_bigint::BigUint;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use super::babyjub::Point;

/// Length of a private key in bytes.
pub const PRIVATE_KEY_LENGTH: usize = 32;

/// Errors that can occur while loading keys.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid private key: expected 32 hex-encoded bytes")]
    InvalidPrivateKey,
}

/// A Baby Jubjub public key, i.e. the point `(ax, ay)`.
pub type PublicKey = Point;

/// A Baby Jubjub private key.
///
/// The ledger never stores one of these. Callers hold the key and pass it
/// (or any other [`TransactionSigner`](super::signatures::TransactionSigner))
/// into each value-moving operation.
#[derive(Clone, PartialEq, Eq)]
pub struct PrivateKey {
    bytes: [u8; PRIVATE_KEY_LENGTH],
}

impl PrivateKey {
    /// Generate a fresh key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; PRIVATE_KEY_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; PRIVATE_KEY_LENGTH]) -> Self {
        Self { bytes }
    }

    /// Parse a hex-encoded key, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, KeyError> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let decoded = hex::decode(raw).map_err(|_| KeyError::InvalidPrivateKey)?;
        let bytes: [u8; PRIVATE_KEY_LENGTH] = decoded
            .try_into()
            .map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self { bytes })
    }

    /// Hex-encode the key bytes. Handle the result accordingly.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// Blake-512 of the key bytes. The low half becomes the scalar, the high
    /// half seeds the per-message nonce.
    pub(crate) fn expanded(&self) -> [u8; 64] {
        let digest = Blake512::digest(&self.bytes[..]);
        let mut out = [0u8; 64];
        out.copy_from_slice(&digest);
        out
    }

    /// The secret scalar `s`, so that `public_key() == B8 * s`.
    ///
    /// The low 32 bytes of the expanded key are clamped (clear the three
    /// cofactor bits, clear bit 255, set bit 254) and shifted right by 3.
    pub fn scalar(&self) -> BigUint {
        let expanded = self.expanded();
        let mut buf = [0u8; 32];
        buf.copy_from_slice(&expanded[..32]);
        buf[0] &= 0xF8;
        buf[31] &= 0x7F;
        buf[31] |= 0x40;
        BigUint::from_bytes_le(&buf) >> 3u32
    }

    /// Derive the public key.
    pub fn public_key(&self) -> PublicKey {
        Point::base8().mul_scalar(&self.scalar())
    }
}

impl FromStr for PrivateKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}
