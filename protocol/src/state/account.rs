//! # Accounts
//!
//! A rollup account is five things: an index, the Ethereum address that
//! owns it on L1, a nonce, a balance, and a Baby Jubjub public key. The
//! index and address are assigned at creation and never change, nor does
//! the key. Nonce and balance move with every operation.
//!
//! Accounts are persisted as self-describing JSON, field by field. Balances
//! are decimal strings because they are arbitrary-precision integers and
//! JSON numbers are not.

use std::fmt;
use std::str::FromStr;

use ark_bn254::Fr;
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::crypto::keys::PublicKey;

/// Account index. `0` is reserved and never assigned.
pub type AccountIndex = u64;

/// Length of an Ethereum address in bytes.
pub const ETH_ADDRESS_LENGTH: usize = 20;

/// Error parsing an Ethereum address.
#[derive(Debug, Error)]
#[error("invalid ethereum address: expected 20 hex-encoded bytes")]
pub struct AddressError;

// ---------------------------------------------------------------------------
// Ethereum address
// ---------------------------------------------------------------------------

/// A 20-byte Ethereum address.
///
/// Inside the circuits the address is the big-endian unsigned integer of
/// its bytes, which always fits in the scalar field.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EthAddress(pub [u8; ETH_ADDRESS_LENGTH]);

impl EthAddress {
    /// The address as a big-endian integer.
    pub fn to_biguint(&self) -> BigUint {
        BigUint::from_bytes_be(&self.0)
    }

    /// The address as a field element.
    pub fn to_field(&self) -> Fr {
        use ark_ff::PrimeField;
        Fr::from_be_bytes_mod_order(&self.0)
    }
}

impl FromStr for EthAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|_| AddressError)?;
        let bytes: [u8; ETH_ADDRESS_LENGTH] = bytes.try_into().map_err(|_| AddressError)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EthAddress({self})")
    }
}

impl Serialize for EthAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EthAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// A rollup account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Position in the tree. Assigned by the store on creation.
    pub index: AccountIndex,
    /// Owning L1 address.
    pub eth_addr: EthAddress,
    /// Incremented every time this account signs a debit.
    pub nonce: u64,
    /// Current balance. Never negative.
    #[serde(with = "decimal")]
    pub balance: BigUint,
    /// Key that must sign every operation debiting this account.
    pub public_key: PublicKey,
}

impl Account {
    /// A blank draft for `create_account`: zero balance, zero nonce, and
    /// index `0` until the store assigns one.
    pub fn new(eth_addr: EthAddress, public_key: PublicKey) -> Self {
        Self {
            index: 0,
            eth_addr,
            nonce: 0,
            balance: BigUint::zero(),
            public_key,
        }
    }

    /// `true` if this looks like a fresh draft.
    pub fn is_blank(&self) -> bool {
        self.balance.is_zero() && self.nonce == 0
    }
}

/// Decimal-string serde for `BigUint` fields.
pub(crate) mod decimal {
    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(deserializer)?;
        BigUint::parse_bytes(s.as_bytes(), 10)
            .ok_or_else(|| serde::de::Error::custom(format!("not a decimal integer: {s:?}")))
    }
}
