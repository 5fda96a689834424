//! # Ledger State
//!
//! The account model and everything that changes it.
//!
//! ```text
//! account.rs  — Account, EthAddress, AccountIndex
//! encoding.rs — account → [Fr; 6], leaf commitment, transaction digest
//! engine.rs   — StateEngine (create/deposit/withdraw/transfer) and SharedLedger
//! ```

pub mod account;
pub mod encoding;
pub mod engine;

pub use account::{Account, AccountIndex, EthAddress};
pub use engine::{
    AccountCreated, BalanceChanged, BalanceOp, SharedLedger, StateEngine, TransferApplied,
};
