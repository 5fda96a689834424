// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Rollup Ledger — Core Library
//!
//! An authenticated account ledger for a layer-2 rollup. Accounts live in a
//! sparse Merkle tree whose leaves are Poseidon commitments, and every state
//! transition produces two things: a new root, and a witness record that an
//! external circom circuit consumes to prove the transition was legal.
//!
//! Getting the witness *bit-exact* is the whole game. The circuit does not
//! care how pretty our Rust is; it cares that `oldStateRoot`, the sibling
//! path, and the signature components are exactly what its own constraints
//! recompute.
//!
//! ## Architecture
//!
//! - **crypto** — BN254 field helpers, Poseidon, Baby Jubjub EdDSA-Poseidon.
//! - **state** — Account model, field encoder, and the state transition engine.
//! - **storage** — sled persistence: account store and the sparse Merkle tree.
//! - **zkp** — Witness assembly for the create/deposit/withdraw/transfer circuits.
//! - **config** — Protocol constants and the TOML-backed ledger configuration.
//! - **error** — The one error type every ledger operation returns.
//!
//! ## Design Philosophy
//!
//! 1. Validate first, write second. A rejected request never leaves a trace.
//! 2. Keys are passed in per call. The ledger never holds a private key.
//! 3. Corruption is not a panic. It is an `InvariantViolation`, and the
//!    engine stops writing until an operator says otherwise.

pub mod config;
pub mod crypto;
pub mod error;
pub mod state;
pub mod storage;
pub mod zkp;

pub use error::{LedgerError, LedgerResult};
