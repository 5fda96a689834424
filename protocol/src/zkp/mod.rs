//! # Zero-Knowledge Witness Module
//!
//! The ledger does not generate or verify proofs. It produces the inputs
//! the circom circuits need to do so, one record per transition:
//!
//! ```text
//! witness.rs  — CreateAccountWitness, BalanceWitness, TransferWitness,
//!               and the Witness enum that writes `<kind>/input.json`
//! ```
//!
//! ## Contract
//!
//! The circuits read these records by field name. Names, order, and the
//! decimal-string encoding are fixed; so is the sibling count of
//! `depth + 1`. A record that would violate any of that is refused with an
//! `InvariantViolation` rather than written.

pub mod witness;

pub use witness::{
    BalanceWitness, CreateAccountWitness, DepositWitness, TransferWitness, Witness, WitnessKind,
    WithdrawWitness,
};
