//! # Cryptographic Primitives
//!
//! Everything here operates on BN254 scalar field elements, because that is
//! the native word of the circuits our witnesses feed:
//!
//! - **field** — integer ↔ `Fr` conversion, decimal rendering, bit access.
//! - **hash** — circom-compatible Poseidon. The one hash we use.
//! - **babyjub** — Baby Jubjub point arithmetic with circomlib's parameters.
//! - **keys** — private/public keys on Baby Jubjub.
//! - **signatures** — EdDSA-Poseidon signing and verification, plus the
//!   `TransactionSigner` capability the state engine consumes.
//!
//! ## A note on "rolling your own crypto"
//!
//! The curve and signature code is small and follows circomlib's reference
//! formulas exactly. It has to: the verifier is a circuit, and a circuit
//! has no patience for creative reinterpretation.

pub mod babyjub;
pub mod field;
pub mod hash;
pub mod keys;
pub mod signatures;

pub use babyjub::Point;
pub use hash::poseidon;
pub use keys::{PrivateKey, PublicKey};
pub use signatures::{sign_poseidon, verify_poseidon, Signature, TransactionSigner};
