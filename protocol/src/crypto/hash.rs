//! # Poseidon Hashing
//!
//! Poseidon is the only hash the ledger uses. Leaf commitments, sparse
//! Merkle tree nodes, transaction digests, and the EdDSA challenge all go
//! through the same primitive, because the circuits recompute every one of
//! them and Poseidon is what is cheap inside an R1CS over BN254.
//!
//! We use `light-poseidon` with its circom-compatible parameters, which
//! match circomlib's `Poseidon(n)` template round-for-round. The arity is
//! the number of inputs; each arity has its own constants, so
//! `poseidon(&[a, b])` and `poseidon(&[a, b, 0])` are unrelated values.

use ark_bn254::Fr;
use light_poseidon::{Poseidon, PoseidonHasher};

use crate::error::{LedgerError, LedgerResult};

/// Largest arity the circom parameter set supports.
pub const MAX_POSEIDON_INPUTS: usize = 12;

/// Hash a sequence of field elements with circom-compatible Poseidon.
///
/// Fails only on an unsupported arity (empty input or more than
/// [`MAX_POSEIDON_INPUTS`] elements).
pub fn poseidon(inputs: &[Fr]) -> LedgerResult<Fr> {
    if inputs.is_empty() || inputs.len() > MAX_POSEIDON_INPUTS {
        return Err(LedgerError::Hash(format!(
            "unsupported poseidon arity {}",
            inputs.len()
        )));
    }
    let mut hasher =
        Poseidon::<Fr>::new_circom(inputs.len()).map_err(|e| LedgerError::Hash(e.to_string()))?;
    hasher
        .hash(inputs)
        .map_err(|e| LedgerError::Hash(e.to_string()))
}
