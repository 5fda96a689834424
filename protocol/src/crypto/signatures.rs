//! # EdDSA-Poseidon Signatures
//!
//! Schnorr-style signatures over Baby Jubjub with Poseidon as the challenge
//! hash, verifiable by circomlib's `EdDSAPoseidonVerifier`:
//!
//! ```text
//! r   = Blake512(nonce_seed || msg) mod l
//! R8  = r * B8
//! hm  = Poseidon(R8.x, R8.y, A.x, A.y, msg)
//! S   = (r + hm * 8s) mod l
//!
//! verify:  S * B8 == R8 + (8 * hm) * A
//! ```
//!
//! The message is a single field element. In the ledger it is always the
//! transaction digest built by the field encoder.
//!
//! Signing is exposed as a capability ([`TransactionSigner`]) rather than as
//! a key the engine holds. Hardware keys, remote signers, and test doubles
//! plug in through the same trait.

use ark_bn254::Fr;
use blake_hash::{Blake512, Digest};
use num_bigint::BigUint;

use super::babyjub::{subgroup_order, Point};
use super::field;
use super::hash::poseidon;
use super::keys::{PrivateKey, PublicKey};
use crate::error::LedgerResult;

/// An EdDSA-Poseidon signature: the scalar `S` and the point `R8`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub s: BigUint,
    pub r8: Point,
}

/// Something that can sign transaction digests on behalf of an account.
pub trait TransactionSigner {
    /// Public key the signatures verify under.
    fn public_key(&self) -> PublicKey;

    /// Sign a transaction digest.
    fn sign(&self, digest: Fr) -> LedgerResult<Signature>;
}

impl TransactionSigner for PrivateKey {
    fn public_key(&self) -> PublicKey {
        PrivateKey::public_key(self)
    }

    fn sign(&self, digest: Fr) -> LedgerResult<Signature> {
        sign_poseidon(self, digest)
    }
}

/// Sign `msg` with `key`.
///
/// Deterministic: the nonce is derived from the key's expanded seed and the
/// message, so the same inputs always give the same signature.
pub fn sign_poseidon(key: &PrivateKey, msg: Fr) -> LedgerResult<Signature> {
    let order = subgroup_order();
    let expanded = key.expanded();

    let mut nonce_input = Vec::with_capacity(64);
    nonce_input.extend_from_slice(&expanded[32..]);
    nonce_input.extend_from_slice(&field::to_bytes_le(&msg));
    let r = BigUint::from_bytes_le(&Blake512::digest(&nonce_input)) % &order;

    let r8 = Point::base8().mul_scalar(&r);
    let a = key.public_key();
    let hm = poseidon(&[r8.x, r8.y, a.x, a.y, msg])?;

    let s = (r + field::to_biguint(&hm) * (key.scalar() << 3u32)) % &order;
    Ok(Signature { s, r8 })
}

/// Verify a signature the way the circuit does.
pub fn verify_poseidon(public_key: &PublicKey, msg: Fr, signature: &Signature) -> bool {
    if signature.s >= subgroup_order() {
        return false;
    }
    if !signature.r8.is_on_curve() || !public_key.is_on_curve() {
        return false;
    }
    let hm = match poseidon(&[
        signature.r8.x,
        signature.r8.y,
        public_key.x,
        public_key.y,
        msg,
    ]) {
        Ok(hm) => hm,
        Err(_) => return false,
    };

    let left = Point::base8().mul_scalar(&signature.s);
    let right = signature
        .r8
        .add(&public_key.mul_scalar(&(field::to_biguint(&hm) * 8u32)));
    left == right
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::PRIVATE_KEY_LENGTH;

    fn key(byte: u8) -> PrivateKey {
        PrivateKey::from_bytes([byte; PRIVATE_KEY_LENGTH])
    }

    #[test]
    fn signature_matches_iden3_vector() {
        let sk = PrivateKey::from_hex(
            "0001020304050607080900010203040506070809000102030405060708090001",
        )
        .unwrap();
        // Little-endian integer of the bytes 00 01 02 .. 09.
        let mut msg_bytes = [0u8; 32];
        msg_bytes[..10].copy_from_slice(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let msg = field::from_bytes_le(&msg_bytes).unwrap();

        let sig = sign_poseidon(&sk, msg).unwrap();
        assert_eq!(
            field::to_decimal(&sig.r8.x),
            "11384336176656855268977457483345535180380036354188103142384839473266348197733"
        );
        assert_eq!(
            field::to_decimal(&sig.r8.y),
            "15383486972088797283337779941324724402501462225528836549661220478783371668959"
        );
        assert_eq!(
            sig.s.to_string(),
            "1672775540645840396591609181675628451599263765380031905495115170613215233181"
        );
        assert!(verify_poseidon(&sk.public_key(), msg, &sig));
    }

    #[test]
    fn sign_and_verify() {
        let sk = key(1);
        let msg = Fr::from(123_456u64);
        let sig = sign_poseidon(&sk, msg).unwrap();
        assert!(verify_poseidon(&sk.public_key(), msg, &sig));
    }

    #[test]
    fn signing_is_deterministic() {
        let sk = key(2);
        let msg = Fr::from(99u64);
        assert_eq!(
            sign_poseidon(&sk, msg).unwrap(),
            sign_poseidon(&sk, msg).unwrap()
        );
    }

    #[test]
    fn wrong_message_fails() {
        let sk = key(3);
        let sig = sign_poseidon(&sk, Fr::from(1u64)).unwrap();
        assert!(!verify_poseidon(&sk.public_key(), Fr::from(2u64), &sig));
    }

    #[test]
    fn wrong_public_key_fails() {
        let sk = key(4);
        let other = key(5);
        let msg = Fr::from(7u64);
        let sig = sign_poseidon(&sk, msg).unwrap();
        assert!(!verify_poseidon(&other.public_key(), msg, &sig));
    }

    #[test]
    fn tampered_scalar_fails() {
        let sk = key(6);
        let msg = Fr::from(8u64);
        let mut sig = sign_poseidon(&sk, msg).unwrap();
        sig.s += 1u32;
        assert!(!verify_poseidon(&sk.public_key(), msg, &sig));
    }

    #[test]
    fn non_canonical_scalar_is_rejected() {
        let sk = key(7);
        let msg = Fr::from(9u64);
        let mut sig = sign_poseidon(&sk, msg).unwrap();
        // S + l is the same group action but not a canonical encoding.
        sig.s += subgroup_order();
        assert!(!verify_poseidon(&sk.public_key(), msg, &sig));
    }

    #[test]
    fn trait_object_signs_like_the_key() {
        let sk = key(8);
        let signer: &dyn TransactionSigner = &sk;
        let msg = Fr::from(10u64);
        assert_eq!(signer.public_key(), sk.public_key());
        assert_eq!(signer.sign(msg).unwrap(), sign_poseidon(&sk, msg).unwrap());
    }
}
