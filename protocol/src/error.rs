//! Error types for the rollup ledger.
//!
//! Every store, tree, and engine operation returns a [`LedgerError`]. The
//! variants split into two families:
//!
//! - **Request errors** (`NotFound`, `DuplicateKey`, `InvalidAmount`,
//!   `InsufficientBalance`, ...) — the caller asked for something illegal.
//!   Nothing was written.
//! - **Integrity errors** (`InvariantViolation`, `Halted`) — the tree or an
//!   encoding is inconsistent with the account store. These are bugs or
//!   corruption, never bad input.
//!
//! Storage errors from sled and file errors from witness output are
//! surfaced unchanged. There is no retry.

use num_bigint::BigUint;
use thiserror::Error;

use crate::state::account::AccountIndex;

/// Errors that can occur while reading or mutating the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An account record or tree key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A tree leaf already exists for this key.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The requested amount is not a positive integer.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The debited account cannot cover the requested amount.
    #[error("insufficient balance for account {index}: have {balance}, need {requested}")]
    InsufficientBalance {
        /// Account that was being debited.
        index: AccountIndex,
        /// Balance at the time of the request.
        balance: BigUint,
        /// Amount that was requested.
        requested: BigUint,
    },

    /// A value does not fit under the BN254 scalar field modulus.
    ///
    /// Balances and amounts are never reduced modulo the field. A value
    /// this large is rejected before it reaches the encoder.
    #[error("{what} does not fit in the scalar field: {value}")]
    FieldOverflow {
        /// Which attribute overflowed (`"amount"`, `"balance"`, ...).
        what: &'static str,
        /// The offending value.
        value: BigUint,
    },

    /// An account draft handed to `create_account` was not blank.
    #[error("invalid account draft: {0}")]
    InvalidDraft(String),

    /// Sender and receiver of a transfer are the same account.
    #[error("account {0} cannot transfer to itself")]
    SelfTransfer(AccountIndex),

    /// The signer's public key does not belong to the debited account.
    #[error("signer is not the owner of account {0}")]
    UnauthorizedSigner(AccountIndex),

    /// The tree cannot address another account.
    #[error("account index {index} exceeds tree capacity {capacity}")]
    CapacityExceeded {
        /// Index that would have been assigned.
        index: AccountIndex,
        /// Highest index the configured depth can hold.
        capacity: AccountIndex,
    },

    /// Internal consistency check failed: sibling count, commitment
    /// mismatch, tree/store divergence. Fatal for the affected tree.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The engine stopped accepting writes after an invariant violation.
    #[error("ledger halted: {0}")]
    Halted(String),

    /// Underlying sled failure.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// A witness file could not be written.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The Poseidon hasher rejected its input.
    #[error("hash error: {0}")]
    Hash(String),
}

impl LedgerError {
    /// `true` for errors that indicate corruption rather than a bad request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_) | Self::Halted(_))
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Shorthand used across the crate.
pub type LedgerResult<T> = Result<T, LedgerError>;
