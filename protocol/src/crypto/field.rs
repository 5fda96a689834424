//! # BN254 Scalar Field Helpers
//!
//! Everything the circuits see is an element of `Fr`, the BN254 scalar
//! field. Everything the ledger stores is an integer. This module is the
//! border crossing between the two, and it is strict about it: an integer
//! that does not fit under the modulus is refused, never silently reduced.
//!
//! Decimal strings are the lingua franca of circom witness files, so the
//! renderers here always produce canonical base-10 without leading zeros
//! (and `"0"` for zero).

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;

/// Byte length of a field element's little-endian encoding.
pub const FIELD_BYTES: usize = 32;

/// The BN254 scalar field modulus as an arbitrary-precision integer.
pub fn modulus() -> BigUint {
    BigUint::from_bytes_le(&Fr::MODULUS.to_bytes_le())
}

/// Convert an integer into a field element.
///
/// Returns `None` when `value >= modulus`.
pub fn to_field(value: &BigUint) -> Option<Fr> {
    if value >= &modulus() {
        return None;
    }
    Some(Fr::from_le_bytes_mod_order(&value.to_bytes_le()))
}

/// The canonical integer representative of a field element.
pub fn to_biguint(element: &Fr) -> BigUint {
    BigUint::from_bytes_le(&element.into_bigint().to_bytes_le())
}

/// Render a field element as a base-10 string.
pub fn to_decimal(element: &Fr) -> String {
    to_biguint(element).to_str_radix(10)
}

/// Parse a base-10 string into a field element, rejecting out-of-range values.
pub fn from_decimal(s: &str) -> Option<Fr> {
    let value = BigUint::parse_bytes(s.as_bytes(), 10)?;
    to_field(&value)
}

/// Fixed-width little-endian bytes of a field element.
pub fn to_bytes_le(element: &Fr) -> [u8; FIELD_BYTES] {
    let mut out = [0u8; FIELD_BYTES];
    let bytes = element.into_bigint().to_bytes_le();
    out[..bytes.len()].copy_from_slice(&bytes);
    out
}

/// Inverse of [`to_bytes_le`]. `None` if the bytes encode a value `>= modulus`.
pub fn from_bytes_le(bytes: &[u8]) -> Option<Fr> {
    to_field(&BigUint::from_bytes_le(bytes))
}

/// Bit `n` of the element's little-endian integer representation.
pub fn test_bit(element: &Fr, n: usize) -> bool {
    let bytes = to_bytes_le(element);
    bytes
        .get(n / 8)
        .map(|byte| byte & (1 << (n % 8)) != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ff::{One, Zero};

    #[test]
    fn zero_renders_as_zero() {
        assert_eq!(to_decimal(&Fr::zero()), "0");
        assert_eq!(to_decimal(&Fr::one()), "1");
    }

    #[test]
    fn decimal_round_trip_near_modulus() {
        let max = modulus() - 1u32;
        let element = to_field(&max).expect("modulus - 1 is in range");
        assert_eq!(to_decimal(&element), max.to_str_radix(10));
        assert_eq!(from_decimal(&max.to_str_radix(10)), Some(element));
    }

    #[test]
    fn modulus_is_rejected() {
        assert!(to_field(&modulus()).is_none());
        assert!(from_decimal(&modulus().to_str_radix(10)).is_none());
    }

    #[test]
    fn malformed_decimal_is_rejected() {
        assert!(from_decimal("12a").is_none());
        assert!(from_decimal("").is_none());
    }

    #[test]
    fn known_modulus_value() {
        assert_eq!(
            modulus().to_str_radix(10),
            "21888242871839275222246405745257275088548364400416034343698204186575808495617"
        );
    }

    #[test]
    fn bits_follow_little_endian_integer_order() {
        let five = Fr::from(5u64); // 0b101
        assert!(test_bit(&five, 0));
        assert!(!test_bit(&five, 1));
        assert!(test_bit(&five, 2));
        assert!(!test_bit(&five, 255));
        assert!(!test_bit(&five, 400));
    }

    #[test]
    fn byte_round_trip() {
        let element = Fr::from(0xDEAD_BEEF_u64);
        let bytes = to_bytes_le(&element);
        assert_eq!(bytes[0], 0xEF);
        assert_eq!(from_bytes_le(&bytes), Some(element));
    }
}
