//! # LedgerDb — Persistent Storage Engine
//!
//! The persistence layer for the ledger, built on sled's embedded key-value
//! store. All on-disk data flows through this module.
//!
//! ## Tree Layout
//!
//! sled organizes data into named "trees", each an independent B+ tree
//! with its own keyspace:
//!
//! | Tree    | Key                          | Value                      |
//! |---------|------------------------------|----------------------------|
//! | `state` | `"l"`                        | last index (varint, 8B)    |
//! | `state` | `'a'` ++ varint(index) (9B)  | `json(Account)`            |
//! | `smt`   | `'n'` ++ node hash (33B)     | node (type byte + 64B)     |
//! | `smt`   | `"r"`                        | root hash (32B LE)         |
//! | `smt`   | `"d"`                        | tree depth (8B BE)         |
//!
//! ## Atomicity
//!
//! Every logical write (one account plus the counter, both accounts of a
//! transfer, every node of a tree mutation plus the new root) is a single
//! `Batch` on a single tree. Either everything lands or nothing does.

use std::path::Path;

use sled::{Db, Tree};

use crate::config::{ACCOUNTS_TREE, SMT_TREE};
use crate::error::LedgerResult;

/// Persistent storage for one ledger instance.
///
/// Cloning is cheap: sled handles are reference counted, so the account
/// store and the Merkle tree can each hold a clone of the same database.
#[derive(Debug, Clone)]
pub struct LedgerDb {
    /// The underlying sled database handle.
    db: Db,
    /// Account records and the index counter.
    accounts: Tree,
    /// Sparse Merkle tree nodes, root, and depth.
    smt: Tree,
}

impl LedgerDb {
    /// Open or create a database at the given filesystem path.
    ///
    /// If the directory doesn't exist, sled creates it. If the database
    /// already exists, all existing data is available immediately.
    pub fn open<P: AsRef<Path>>(path: P) -> LedgerResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that is cleaned up automatically when
    /// the last handle is dropped.
    ///
    /// Ideal for unit tests: no filesystem side effects, no cleanup needed.
    pub fn open_temporary() -> LedgerResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> LedgerResult<Self> {
        let accounts = db.open_tree(ACCOUNTS_TREE)?;
        let smt = db.open_tree(SMT_TREE)?;
        Ok(Self { db, accounts, smt })
    }

    /// The tree holding account records.
    pub fn accounts_tree(&self) -> &Tree {
        &self.accounts
    }

    /// The tree holding Merkle nodes.
    pub fn smt_tree(&self) -> &Tree {
        &self.smt
    }

    /// Force a flush of all pending writes to disk.
    ///
    /// sled buffers writes in memory. This call blocks until all data is
    /// durable on the underlying storage device.
    pub fn flush(&self) -> LedgerResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
