//! # Field Encoding
//!
//! Turns an account into the six field elements its leaf commits to:
//!
//! ```text
//! [ index, nonce, balance, ethAddr, ax, ay ]
//! ```
//!
//! The order is fixed by the circuits. Changing it changes every root.
//!
//! The address is re-read from its 20 bytes as a big-endian integer on
//! every call. Balances and amounts are checked against the field modulus
//! and refused with `FieldOverflow` if they do not fit; reducing them would
//! let two different balances share one commitment.

use ark_bn254::Fr;
use num_bigint::BigUint;

use super::account::Account;
use crate::config::ACCOUNT_FIELD_COUNT;
use crate::crypto::field;
use crate::crypto::hash::poseidon;
use crate::error::{LedgerError, LedgerResult};

/// Convert an integer attribute to a field element or fail with
/// `FieldOverflow` naming it.
pub fn checked_field(what: &'static str, value: &BigUint) -> LedgerResult<Fr> {
    field::to_field(value).ok_or_else(|| LedgerError::FieldOverflow {
        what,
        value: value.clone(),
    })
}

/// Encode an account into its ordered field elements.
pub fn encode(account: &Account) -> LedgerResult<[Fr; ACCOUNT_FIELD_COUNT]> {
    Ok([
        Fr::from(account.index),
        Fr::from(account.nonce),
        checked_field("balance", &account.balance)?,
        account.eth_addr.to_field(),
        account.public_key.x,
        account.public_key.y,
    ])
}

/// The leaf commitment: Poseidon over the encoded account.
pub fn commitment(account: &Account) -> LedgerResult<Fr> {
    poseidon(&encode(account)?)
}

/// The message a signer signs for a value-moving operation:
/// `Poseidon(pre_commitment, amount)`.
///
/// Binding the pre-mutation commitment ties the signature to one exact
/// account state, nonce included, so it cannot be replayed.
pub fn transaction_digest(pre_commitment: Fr, amount: &BigUint) -> LedgerResult<Fr> {
    let amount = checked_field("amount", amount)?;
    poseidon(&[pre_commitment, amount])
}
