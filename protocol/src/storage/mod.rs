//! # Storage Module
//!
//! Everything the ledger keeps on disk, in one sled database.
//!
//! ## Architecture
//!
//! ```text
//! db.rs       — LedgerDb: sled handle, named trees, temporary DBs for tests
//! accounts.rs — AccountStore: index counter and JSON account records
//! tree.rs     — AuthenticatedTree trait and the processor proof shape
//! smt.rs      — SparseMerkleTree: iden3-compatible sparse Merkle tree
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! StateEngine ──► AccountStore ──► LedgerDb ("state")
//!      │
//!      └────────► SparseMerkleTree ──► LedgerDb ("smt")
//! ```
//!
//! The store and the tree never talk to each other. Keeping them in step
//! is the engine's job, and the engine halts if they ever drift apart.
//!
//! ## Design Decisions
//!
//! 1. **JSON for account records.** Self-describing and easy to inspect
//!    with any sled dump tool. Accounts are tiny, so size is not a concern.
//!
//! 2. **Content-addressed tree nodes.** A node's key is its own Poseidon
//!    hash, so writing a node twice is harmless and old roots stay
//!    readable.
//!
//! 3. **One batch per logical write.** sled batches are atomic per tree,
//!    and every logical write touches exactly one tree.

pub mod accounts;
pub mod db;
pub mod smt;
pub mod tree;

pub use accounts::AccountStore;
pub use db::LedgerDb;
pub use smt::SparseMerkleTree;
pub use tree::{AuthenticatedTree, TreeOperation, TreeProof};
