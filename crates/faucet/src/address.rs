//! Destination address parsing and validation.
//!
//! Addresses are 20 bytes written as `0x` + 40 hex digits. Single-case input is
//! accepted as-is; mixed-case input must carry a valid checksum. With a chain
//! id the checksum follows RSKIP-60 / EIP-1191, without one it is plain EIP-55.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const ADDRESS_LENGTH: usize = 20;
const ADDRESS_HEX_LENGTH: usize = ADDRESS_LENGTH * 2;
const ADDRESS_PREFIX: &str = "0x";

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Address(pub [u8; ADDRESS_LENGTH]);

impl Address {
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Derives the account address of an uncompressed secp256k1 public key.
    pub fn from_verifying_key(key: &k256::ecdsa::VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        let hash = keccak_hash::keccak(&point.as_bytes()[1..]);
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&hash.0[12..]);
        Address(bytes)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", hex::encode(self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Error returned when a string is not `0x` followed by 40 hex digits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed address: {0}")]
pub struct ParseAddressError(String);

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix(ADDRESS_PREFIX)
            .filter(|body| body.len() == ADDRESS_HEX_LENGTH)
            .ok_or_else(|| ParseAddressError(s.to_string()))?;

        let mut bytes = [0u8; ADDRESS_LENGTH];
        hex::decode_to_slice(body, &mut bytes).map_err(|_| ParseAddressError(s.to_string()))?;
        Ok(Address(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Lowercases an address for use as an identity key.
pub fn normalize(address: &str) -> String {
    address.to_ascii_lowercase()
}

/// Checks whether `address` may receive a disbursement on `chain_id`.
///
/// Rules apply in order and the first match decides: the zero address is
/// rejected, the `0x` prefix and 40 hex digits are required, single-case
/// bodies are accepted, and mixed-case bodies must match the checksum.
pub fn is_valid_address(address: &str, chain_id: u64) -> bool {
    if is_zero_literal(address) {
        return false;
    }

    let Some(body) = address.strip_prefix(ADDRESS_PREFIX) else {
        return false;
    };

    if body.len() != ADDRESS_HEX_LENGTH || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return false;
    }

    let has_lower = body.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = body.bytes().any(|b| b.is_ascii_uppercase());
    if !(has_lower && has_upper) {
        return true;
    }

    is_valid_checksum(address, Some(chain_id))
}

fn is_zero_literal(address: &str) -> bool {
    address.parse::<Address>().map_or(false, |parsed| parsed.is_zero())
}

/// Mixed-case checksum encoding of `address`.
///
/// `chain_id = None` yields EIP-55, `Some(id)` hashes `"{id}0x{hex}"` instead.
pub fn to_checksum_address(address: &Address, chain_id: Option<u64>) -> String {
    let lower = hex::encode(address.0);
    let preimage = match chain_id {
        Some(id) => format!("{}{}{}", id, ADDRESS_PREFIX, lower),
        None => lower.clone(),
    };
    let hash = keccak_hash::keccak(preimage.as_bytes());

    let mut out = String::with_capacity(ADDRESS_PREFIX.len() + ADDRESS_HEX_LENGTH);
    out.push_str(ADDRESS_PREFIX);
    for (i, c) in lower.chars().enumerate() {
        let byte = hash.0[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        if nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// True iff `address` is exactly its own checksum encoding.
pub fn is_valid_checksum(address: &str, chain_id: Option<u64>) -> bool {
    match address.parse::<Address>() {
        Ok(parsed) => to_checksum_address(&parsed, chain_id) == address,
        Err(_) => false,
    }
}
