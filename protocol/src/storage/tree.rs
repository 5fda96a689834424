//! # Authenticated Tree
//!
//! The engine talks to the Merkle tree only through [`AuthenticatedTree`].
//! Keys are account indices, values are leaf commitments, and the tree
//! treats both as opaque field elements.
//!
//! Every mutation returns a [`TreeProof`] shaped like circomlib's
//! `SMTProcessor` input: old/new root, the sibling path, the leaf that used
//! to sit where the key's path ends, and the `isOld0` flag.

use ark_bn254::Fr;

use crate::error::{LedgerError, LedgerResult};
use crate::state::account::AccountIndex;

/// Which processor function produced a proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeOperation {
    Insert,
    Update,
}

/// A processor proof for one tree mutation. Not persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeProof {
    pub operation: TreeOperation,
    pub old_root: Fr,
    pub new_root: Fr,
    /// Sibling hashes from the root down, zero padded to `depth + 1`.
    pub siblings: Vec<Fr>,
    pub old_key: Fr,
    pub old_value: Fr,
    pub new_key: Fr,
    pub new_value: Fr,
    /// `true` when the key's path ended at an empty node before the insert.
    pub is_old0: bool,
}

impl TreeProof {
    /// Check the sibling count the circuits are compiled for.
    pub fn check_shape(&self, depth: usize) -> LedgerResult<()> {
        if self.siblings.len() != depth + 1 {
            return Err(LedgerError::InvariantViolation(format!(
                "proof has {} siblings, expected {}",
                self.siblings.len(),
                depth + 1
            )));
        }
        Ok(())
    }
}

/// A key-value Merkle tree that can prove its mutations.
pub trait AuthenticatedTree {
    /// Add a leaf for `index`. `DuplicateKey` if one exists.
    fn insert(&mut self, index: AccountIndex, commitment: Fr) -> LedgerResult<TreeProof>;

    /// Replace the leaf for `index`. `NotFound` if there is none.
    fn update(&mut self, index: AccountIndex, commitment: Fr) -> LedgerResult<TreeProof>;

    /// Current leaf value for `index`, if any.
    fn get(&self, index: AccountIndex) -> LedgerResult<Option<Fr>>;

    /// Current root.
    fn root(&self) -> Fr;

    /// Configured depth.
    fn depth(&self) -> usize;
}
