//! # Sparse Merkle Tree
//!
//! A persistent sparse Merkle tree with iden3 semantics, so that every
//! proof it emits is accepted by circomlib's `SMTProcessor`.
//!
//! ## Nodes
//!
//! ```text
//! empty   hash = 0
//! leaf    hash = Poseidon(key, value, 1)
//! middle  hash = Poseidon(left, right)
//! ```
//!
//! Bit `i` of a key (little-endian) picks the child at level `i`: `0` goes
//! left, `1` goes right. Leaves are not pushed to the bottom. A leaf sits at
//! the first level where its path no longer collides with another key,
//! which keeps a sparse tree shallow.
//!
//! ## Capacity
//!
//! Leaves may sit at most at level `depth - 1`, so two keys must differ in
//! their low `depth - 1` bits. For account indices that means `1..=2^(depth-1)`.
//!
//! ## Persistence
//!
//! Nodes are content addressed (`'n' ++ hash`). A mutation collects its new
//! nodes in memory and writes them together with the new root in one sled
//! batch. Superseded nodes are never deleted.

use ark_bn254::Fr;
use ark_ff::{One, Zero};
use sled::{Batch, Tree};
use tracing::debug;

use super::db::LedgerDb;
use super::tree::{AuthenticatedTree, TreeOperation, TreeProof};
use crate::config::{account_capacity, MAX_TREE_DEPTH, MIN_TREE_DEPTH};
use crate::crypto::field::{self, FIELD_BYTES};
use crate::crypto::hash::poseidon;
use crate::error::{LedgerError, LedgerResult};
use crate::state::account::AccountIndex;

// ---------------------------------------------------------------------------
// Storage keys
// ---------------------------------------------------------------------------

const PREFIX_NODE: u8 = b'n';
const KEY_ROOT: &[u8] = b"r";
const KEY_DEPTH: &[u8] = b"d";

const NODE_MIDDLE: u8 = 0;
const NODE_LEAF: u8 = 1;

fn node_key(hash: &Fr) -> [u8; 1 + FIELD_BYTES] {
    let mut key = [0u8; 1 + FIELD_BYTES];
    key[0] = PREFIX_NODE;
    key[1..].copy_from_slice(&field::to_bytes_le(hash));
    key
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Node {
    Empty,
    Leaf { key: Fr, value: Fr },
    Middle { left: Fr, right: Fr },
}

impl Node {
    fn hash(&self) -> LedgerResult<Fr> {
        match self {
            Node::Empty => Ok(Fr::zero()),
            Node::Leaf { key, value } => poseidon(&[*key, *value, Fr::one()]),
            Node::Middle { left, right } => poseidon(&[*left, *right]),
        }
    }

    fn encode(&self) -> Vec<u8> {
        let (kind, a, b) = match self {
            Node::Empty => return Vec::new(),
            Node::Leaf { key, value } => (NODE_LEAF, key, value),
            Node::Middle { left, right } => (NODE_MIDDLE, left, right),
        };
        let mut out = Vec::with_capacity(1 + 2 * FIELD_BYTES);
        out.push(kind);
        out.extend_from_slice(&field::to_bytes_le(a));
        out.extend_from_slice(&field::to_bytes_le(b));
        out
    }

    fn decode(bytes: &[u8]) -> LedgerResult<Node> {
        if bytes.len() != 1 + 2 * FIELD_BYTES {
            return Err(LedgerError::Serialization(format!(
                "tree node has {} bytes",
                bytes.len()
            )));
        }
        let a = field::from_bytes_le(&bytes[1..1 + FIELD_BYTES]);
        let b = field::from_bytes_le(&bytes[1 + FIELD_BYTES..]);
        let (a, b) = match (a, b) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(LedgerError::Serialization(
                    "tree node holds a non-canonical field element".to_string(),
                ))
            }
        };
        match bytes[0] {
            NODE_MIDDLE => Ok(Node::Middle { left: a, right: b }),
            NODE_LEAF => Ok(Node::Leaf { key: a, value: b }),
            other => Err(LedgerError::Serialization(format!(
                "unknown tree node type {other}"
            ))),
        }
    }
}

/// Nodes created by one mutation, written together with the new root.
#[derive(Default)]
struct PendingNodes {
    nodes: Vec<(Fr, Node)>,
}

impl PendingNodes {
    fn add(&mut self, node: Node) -> LedgerResult<Fr> {
        let hash = node.hash()?;
        if node != Node::Empty {
            self.nodes.push((hash, node));
        }
        Ok(hash)
    }
}

/// Where a key's path ends.
enum PathEnd {
    Empty,
    Leaf { key: Fr, value: Fr },
}

/// A leaf about to be inserted.
struct NewLeaf {
    index: AccountIndex,
    key: Fr,
    node: Node,
}

// ---------------------------------------------------------------------------
// SparseMerkleTree
// ---------------------------------------------------------------------------

/// The account tree, persisted in the database's `smt` tree.
#[derive(Debug, Clone)]
pub struct SparseMerkleTree {
    tree: Tree,
    depth: usize,
    root: Fr,
}

impl SparseMerkleTree {
    /// Open the tree stored in `db`, creating it on first use.
    ///
    /// The depth is recorded on first open. Reopening with a different
    /// depth is an `InvariantViolation`: every stored node would hash
    /// differently under the circuits compiled for the new depth.
    pub fn open(db: &LedgerDb, depth: usize) -> LedgerResult<Self> {
        if !(MIN_TREE_DEPTH..=MAX_TREE_DEPTH).contains(&depth) {
            return Err(LedgerError::InvariantViolation(format!(
                "unsupported tree depth {depth}"
            )));
        }
        let tree = db.smt_tree().clone();

        match tree.get(KEY_DEPTH)? {
            Some(bytes) => {
                let stored = u64::from_be_bytes(bytes.as_ref().try_into().map_err(|_| {
                    LedgerError::Serialization("invalid depth bytes".to_string())
                })?);
                if stored != depth as u64 {
                    return Err(LedgerError::InvariantViolation(format!(
                        "tree was created with depth {stored}, opened with {depth}"
                    )));
                }
            }
            None => {
                tree.insert(KEY_DEPTH, &(depth as u64).to_be_bytes()[..])?;
            }
        }

        let root = match tree.get(KEY_ROOT)? {
            Some(bytes) => field::from_bytes_le(&bytes)
                .ok_or_else(|| LedgerError::Serialization("invalid root bytes".to_string()))?,
            None => Fr::zero(),
        };

        debug!(depth, root = %field::to_decimal(&root), "merkle tree opened");
        Ok(Self { tree, depth, root })
    }

    fn get_node(&self, hash: &Fr) -> LedgerResult<Node> {
        if hash.is_zero() {
            return Ok(Node::Empty);
        }
        match self.tree.get(node_key(hash))? {
            Some(bytes) => Node::decode(&bytes),
            None => Err(LedgerError::InvariantViolation(format!(
                "missing tree node {}",
                field::to_decimal(hash)
            ))),
        }
    }

    /// Follow `key`'s path from the root, collecting middle-node siblings.
    fn walk(&self, key: &Fr) -> LedgerResult<(PathEnd, Vec<Fr>)> {
        let mut siblings = Vec::new();
        let mut next = self.root;
        for lvl in 0..self.depth {
            match self.get_node(&next)? {
                Node::Empty => return Ok((PathEnd::Empty, siblings)),
                Node::Leaf { key, value } => return Ok((PathEnd::Leaf { key, value }, siblings)),
                Node::Middle { left, right } => {
                    if field::test_bit(key, lvl) {
                        siblings.push(left);
                        next = right;
                    } else {
                        siblings.push(right);
                        next = left;
                    }
                }
            }
        }
        Err(LedgerError::InvariantViolation(
            "tree path is deeper than the configured depth".to_string(),
        ))
    }

    fn add_leaf(
        &self,
        pending: &mut PendingNodes,
        leaf: &NewLeaf,
        at: Fr,
        lvl: usize,
    ) -> LedgerResult<Fr> {
        if lvl > self.depth - 1 {
            return Err(self.capacity_error(leaf.index));
        }
        match self.get_node(&at)? {
            Node::Empty => pending.add(leaf.node),
            existing @ Node::Leaf { key, .. } => {
                if key == leaf.key {
                    return Err(LedgerError::DuplicateKey(format!("account {}", leaf.index)));
                }
                self.push_leaf(pending, leaf, existing, key, lvl)
            }
            Node::Middle { left, right } => {
                let middle = if field::test_bit(&leaf.key, lvl) {
                    let next = self.add_leaf(pending, leaf, right, lvl + 1)?;
                    Node::Middle { left, right: next }
                } else {
                    let next = self.add_leaf(pending, leaf, left, lvl + 1)?;
                    Node::Middle { left: next, right }
                };
                pending.add(middle)
            }
        }
    }

    /// Replace the leaf `old` at `lvl` with a chain of middle nodes that
    /// ends where the two keys' paths diverge.
    fn push_leaf(
        &self,
        pending: &mut PendingNodes,
        leaf: &NewLeaf,
        old: Node,
        old_key: Fr,
        lvl: usize,
    ) -> LedgerResult<Fr> {
        if lvl + 2 > self.depth {
            return Err(self.capacity_error(leaf.index));
        }
        let new_bit = field::test_bit(&leaf.key, lvl);
        if new_bit == field::test_bit(&old_key, lvl) {
            let next = self.push_leaf(pending, leaf, old, old_key, lvl + 1)?;
            let middle = if new_bit {
                Node::Middle {
                    left: Fr::zero(),
                    right: next,
                }
            } else {
                Node::Middle {
                    left: next,
                    right: Fr::zero(),
                }
            };
            return pending.add(middle);
        }

        let old_hash = old.hash()?;
        let new_hash = pending.add(leaf.node)?;
        let middle = if new_bit {
            Node::Middle {
                left: old_hash,
                right: new_hash,
            }
        } else {
            Node::Middle {
                left: new_hash,
                right: old_hash,
            }
        };
        pending.add(middle)
    }

    /// Recompute hashes from a leaf up to the root along `key`'s path.
    fn recalculate_path(
        &self,
        pending: &mut PendingNodes,
        key: &Fr,
        leaf_hash: Fr,
        siblings: &[Fr],
    ) -> LedgerResult<Fr> {
        let mut node = leaf_hash;
        for (lvl, sibling) in siblings.iter().enumerate().rev() {
            let middle = if field::test_bit(key, lvl) {
                Node::Middle {
                    left: *sibling,
                    right: node,
                }
            } else {
                Node::Middle {
                    left: node,
                    right: *sibling,
                }
            };
            node = pending.add(middle)?;
        }
        Ok(node)
    }

    fn commit(&mut self, pending: PendingNodes, new_root: Fr) -> LedgerResult<()> {
        let written = pending.nodes.len();
        let mut batch = Batch::default();
        for (hash, node) in pending.nodes {
            batch.insert(&node_key(&hash)[..], node.encode());
        }
        batch.insert(KEY_ROOT, &field::to_bytes_le(&new_root)[..]);
        self.tree.apply_batch(batch)?;
        self.root = new_root;

        debug!(
            nodes = written,
            root = %field::to_decimal(&new_root),
            "merkle tree committed"
        );
        Ok(())
    }

    /// Siblings padded with zeros to the `depth + 1` entries the circuits expect.
    fn circom_siblings(&self, mut siblings: Vec<Fr>) -> Vec<Fr> {
        siblings.resize(self.depth + 1, Fr::zero());
        siblings
    }

    fn capacity_error(&self, index: AccountIndex) -> LedgerError {
        LedgerError::CapacityExceeded {
            index,
            capacity: account_capacity(self.depth),
        }
    }
}

impl AuthenticatedTree for SparseMerkleTree {
    fn insert(&mut self, index: AccountIndex, commitment: Fr) -> LedgerResult<TreeProof> {
        if index == 0 {
            return Err(LedgerError::InvariantViolation(
                "index 0 is reserved".to_string(),
            ));
        }
        let key = Fr::from(index);
        let old_root = self.root;

        let (end, siblings) = self.walk(&key)?;
        let (old_key, old_value) = match end {
            PathEnd::Empty => (Fr::zero(), Fr::zero()),
            PathEnd::Leaf { key: found, .. } if found == key => {
                return Err(LedgerError::DuplicateKey(format!("account {index}")));
            }
            PathEnd::Leaf { key, value } => (key, value),
        };

        let leaf = NewLeaf {
            index,
            key,
            node: Node::Leaf {
                key,
                value: commitment,
            },
        };
        let mut pending = PendingNodes::default();
        let new_root = self.add_leaf(&mut pending, &leaf, old_root, 0)?;
        self.commit(pending, new_root)?;

        let proof = TreeProof {
            operation: TreeOperation::Insert,
            old_root,
            new_root,
            siblings: self.circom_siblings(siblings),
            old_key,
            old_value,
            new_key: key,
            new_value: commitment,
            is_old0: old_key.is_zero(),
        };
        proof.check_shape(self.depth)?;
        Ok(proof)
    }

    fn update(&mut self, index: AccountIndex, commitment: Fr) -> LedgerResult<TreeProof> {
        let key = Fr::from(index);
        let old_root = self.root;

        let (end, siblings) = self.walk(&key)?;
        let old_value = match end {
            PathEnd::Leaf { key: found, value } if found == key => value,
            _ => return Err(LedgerError::NotFound(format!("tree leaf {index}"))),
        };

        let mut pending = PendingNodes::default();
        let leaf_hash = pending.add(Node::Leaf {
            key,
            value: commitment,
        })?;
        let new_root = self.recalculate_path(&mut pending, &key, leaf_hash, &siblings)?;
        self.commit(pending, new_root)?;

        let proof = TreeProof {
            operation: TreeOperation::Update,
            old_root,
            new_root,
            siblings: self.circom_siblings(siblings),
            old_key: key,
            old_value,
            new_key: key,
            new_value: commitment,
            is_old0: false,
        };
        proof.check_shape(self.depth)?;
        Ok(proof)
    }

    fn get(&self, index: AccountIndex) -> LedgerResult<Option<Fr>> {
        let key = Fr::from(index);
        match self.walk(&key)? {
            (PathEnd::Leaf { key: found, value }, _) if found == key => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    fn root(&self) -> Fr {
        self.root
    }

    fn depth(&self) -> usize {
        self.depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(depth: usize) -> SparseMerkleTree {
        SparseMerkleTree::open(&LedgerDb::open_temporary().unwrap(), depth).unwrap()
    }

    fn leaf(k: u64, v: u64) -> Fr {
        poseidon(&[Fr::from(k), Fr::from(v), Fr::one()]).unwrap()
    }

    fn middle(l: Fr, r: Fr) -> Fr {
        poseidon(&[l, r]).unwrap()
    }

    #[test]
    fn empty_tree_has_zero_root() {
        let t = tree(10);
        assert!(t.root().is_zero());
        assert_eq!(t.get(1).unwrap(), None);
    }

    #[test]
    fn first_insert_is_the_root_leaf() {
        let mut t = tree(10);
        let proof = t.insert(1, Fr::from(100u64)).unwrap();

        assert_eq!(t.root(), leaf(1, 100));
        assert!(proof.old_root.is_zero());
        assert_eq!(proof.new_root, t.root());
        assert!(proof.is_old0);
        assert!(proof.old_key.is_zero());
        assert_eq!(proof.siblings, vec![Fr::zero(); 11]);
        assert_eq!(proof.operation, TreeOperation::Insert);
    }

    /// Roots from go-merkletree's `TestNewTree`, which circomlib's
    /// `smtjs` test reproduces. Inserts are cumulative.
    #[test]
    fn roots_match_go_merkletree() {
        let mut t = tree(MAX_TREE_DEPTH);
        let expected = [
            (
                1u64,
                2u64,
                "13578938674299138072471463694055224830892726234048532520316387704878000008795",
            ),
            (
                33,
                44,
                "5412393676474193513566895793055462193090331607895808993925969873307089394741",
            ),
            (
                1234,
                9876,
                "14204494359367183802864593755198662203838502594566452929175967972147978322084",
            ),
        ];
        for (key, value, root) in expected {
            let proof = t.insert(key, Fr::from(value)).unwrap();
            assert_eq!(field::to_decimal(&t.root()), root, "root after inserting {key}");
            assert_eq!(proof.new_root, t.root());
        }
    }

    #[test]
    fn collision_pushes_leaves_down() {
        let mut t = tree(10);
        t.insert(1, Fr::from(10u64)).unwrap();

        // 2 = 0b10 goes left at level 0, 1 goes right.
        let proof = t.insert(2, Fr::from(20u64)).unwrap();
        assert_eq!(t.root(), middle(leaf(2, 20), leaf(1, 10)));
        assert!(!proof.is_old0);
        assert_eq!(proof.old_key, Fr::from(1u64));
        assert_eq!(proof.old_value, Fr::from(10u64));
        assert_eq!(proof.siblings, vec![Fr::zero(); 11]);

        // 3 = 0b11 follows 1 to the right, then they split on bit 1.
        let proof = t.insert(3, Fr::from(30u64)).unwrap();
        assert_eq!(
            t.root(),
            middle(leaf(2, 20), middle(leaf(1, 10), leaf(3, 30)))
        );
        assert_eq!(proof.siblings[0], leaf(2, 20));
        assert!(proof.siblings[1..].iter().all(|s| s.is_zero()));
        assert_eq!(proof.old_key, Fr::from(1u64));
    }

    #[test]
    fn deep_collision_adds_empty_siblings() {
        let mut t = tree(10);
        t.insert(1, Fr::from(1u64)).unwrap();
        // 5 = 0b101 shares bits 0 and 1 with 1, diverges at bit 2.
        t.insert(5, Fr::from(5u64)).unwrap();
        let expected = middle(
            Fr::zero(),
            middle(middle(leaf(1, 1), leaf(5, 5)), Fr::zero()),
        );
        assert_eq!(t.root(), expected);
    }

    #[test]
    fn insert_into_empty_branch_sets_is_old0() {
        let mut t = tree(10);
        t.insert(1, Fr::from(1u64)).unwrap();
        t.insert(2, Fr::from(2u64)).unwrap();
        t.insert(3, Fr::from(3u64)).unwrap();
        // 4 = 0b100 goes left, meets leaf 2 (0b010), splits on bit 1.
        let proof = t.insert(4, Fr::from(4u64)).unwrap();
        assert!(!proof.is_old0);
        assert_eq!(proof.old_key, Fr::from(2u64));

        let mut t = tree(10);
        t.insert(1, Fr::from(1u64)).unwrap();
        t.insert(5, Fr::from(5u64)).unwrap();
        // 2 goes left at level 0, where only an empty node hangs.
        let proof = t.insert(2, Fr::from(2u64)).unwrap();
        assert!(proof.is_old0);
        assert!(proof.old_value.is_zero());
        assert_ne!(proof.siblings[0], Fr::zero());
    }

    #[test]
    fn root_is_independent_of_insertion_order() {
        let mut a = tree(10);
        let mut b = tree(10);
        for k in 1..=20u64 {
            a.insert(k, Fr::from(k * 7)).unwrap();
        }
        for k in (1..=20u64).rev() {
            b.insert(k, Fr::from(k * 7)).unwrap();
        }
        assert_eq!(a.root(), b.root());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut t = tree(10);
        t.insert(1, Fr::from(1u64)).unwrap();
        let root = t.root();
        assert!(matches!(
            t.insert(1, Fr::from(2u64)),
            Err(LedgerError::DuplicateKey(_))
        ));
        assert_eq!(t.root(), root);
    }

    #[test]
    fn update_replaces_value_and_chains_roots() {
        let mut t = tree(10);
        for k in 1..=4u64 {
            t.insert(k, Fr::from(k)).unwrap();
        }
        let before = t.root();
        let proof = t.update(3, Fr::from(99u64)).unwrap();

        assert_eq!(proof.operation, TreeOperation::Update);
        assert_eq!(proof.old_root, before);
        assert_eq!(proof.new_root, t.root());
        assert_eq!(proof.old_key, proof.new_key);
        assert_eq!(proof.old_value, Fr::from(3u64));
        assert_eq!(proof.new_value, Fr::from(99u64));
        assert!(!proof.is_old0);
        assert_eq!(t.get(3).unwrap(), Some(Fr::from(99u64)));

        // Same contents built from scratch give the same root.
        let mut fresh = tree(10);
        for k in 1..=4u64 {
            let v = if k == 3 { 99 } else { k };
            fresh.insert(k, Fr::from(v)).unwrap();
        }
        assert_eq!(fresh.root(), t.root());
    }

    #[test]
    fn update_missing_leaf_fails() {
        let mut t = tree(10);
        assert!(matches!(
            t.update(1, Fr::from(1u64)),
            Err(LedgerError::NotFound(_))
        ));
        t.insert(1, Fr::from(1u64)).unwrap();
        assert!(matches!(
            t.update(3, Fr::from(1u64)),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn capacity_is_two_to_the_depth_minus_one() {
        let mut t = tree(3);
        for k in 1..=4u64 {
            t.insert(k, Fr::from(k)).unwrap();
        }
        let root = t.root();
        assert!(matches!(
            t.insert(5, Fr::from(5u64)),
            Err(LedgerError::CapacityExceeded { index: 5, capacity: 4 })
        ));
        assert_eq!(t.root(), root);
    }

    #[test]
    fn every_proof_has_depth_plus_one_siblings() {
        let mut t = tree(6);
        for k in 1..=32u64 {
            let proof = t.insert(k, Fr::from(k)).unwrap();
            assert_eq!(proof.siblings.len(), 7);
        }
        for k in 1..=32u64 {
            let proof = t.update(k, Fr::from(k + 1)).unwrap();
            assert_eq!(proof.siblings.len(), 7);
        }
    }

    #[test]
    fn node_encoding_round_trip() {
        let node = Node::Middle {
            left: Fr::from(3u64),
            right: Fr::from(4u64),
        };
        assert_eq!(Node::decode(&node.encode()).unwrap(), node);
        assert!(Node::decode(&[9u8; 65]).is_err());
        assert!(Node::decode(&[0u8; 3]).is_err());
    }

    #[test]
    fn reopen_restores_root_and_checks_depth() {
        let dir = tempfile::tempdir().unwrap();
        let root = {
            let db = LedgerDb::open(dir.path()).unwrap();
            let mut t = SparseMerkleTree::open(&db, 10).unwrap();
            t.insert(1, Fr::from(1u64)).unwrap();
            t.insert(2, Fr::from(2u64)).unwrap();
            db.flush().unwrap();
            t.root()
        };

        let db = LedgerDb::open(dir.path()).unwrap();
        let t = SparseMerkleTree::open(&db, 10).unwrap();
        assert_eq!(t.root(), root);
        assert_eq!(t.get(2).unwrap(), Some(Fr::from(2u64)));

        assert!(matches!(
            SparseMerkleTree::open(&db, 12),
            Err(LedgerError::InvariantViolation(_))
        ));
    }
}
