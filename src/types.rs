//! Canonical wrapper types shared by the store, RPC client, and HTTP layer.
//!
//! Addresses are always carried as [`EvmAddress`], which (de)serializes and displays as an
//! EIP-55 checksummed string. Token amounts are unbounded non-negative integers; [`TokenAmount`]
//! carries them as [`alloy_primitives::U256`] in memory and as decimal text at every boundary
//! (store column, JSON response) to avoid precision loss.

use alloy_primitives::{Address, U256, hex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// The literal zero address, excluded from `Balance` and `AddressType` per I6.
pub const ZERO_ADDRESS: Address = Address::ZERO;

/// keccak256("Transfer(address,address,uint256)"), as a `0x`-prefixed lowercase hex string.
pub const TRANSFER_TOPIC0: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// An Ethereum address, displayed and serialized in EIP-55 checksummed form.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct EvmAddress(pub Address);

impl EvmAddress {
    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_ADDRESS
    }
}

impl FromStr for EvmAddress {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Address::from_str(s)?))
    }
}

impl Display for EvmAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_checksum(None))
    }
}

impl From<Address> for EvmAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl From<EvmAddress> for Address {
    fn from(value: EvmAddress) -> Self {
        value.0
    }
}

impl Serialize for EvmAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EvmAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// An unbounded non-negative token amount, serialized as decimal text.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct TokenAmount(pub U256);

impl TokenAmount {
    pub const ZERO: TokenAmount = TokenAmount(U256::ZERO);

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for TokenAmount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        U256::from_str_radix(s, 10)
            .map(Self)
            .map_err(|e| e.to_string())
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// A single decoded ERC-20 `Transfer` event, as carried from the RPC client into the store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Transfer {
    pub block_number: u64,
    pub tx_hash: String,
    pub log_index: u64,
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: TokenAmount,
}

/// The smart-wallet bytecode prefixes treated as EOA-equivalent for holder accounting.
///
/// Kept as plain data (not `match` arms) so a future config layer could load additional
/// prefixes without touching the classifier.
pub fn default_smart_wallet_patterns() -> Vec<String> {
    vec![
        "0xef01".to_string(),
        "0xef0100".to_string(),
        "0x363d3d373d3d3d363d73".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evm_address_checksums_on_display() {
        let addr: EvmAddress = "0x0000000000000000000000000000000000000001"
            .parse()
            .unwrap();
        assert_eq!(
            addr.to_string(),
            "0x0000000000000000000000000000000000000001"
        );
    }

    #[test]
    fn evm_address_round_trips_through_json() {
        let addr: EvmAddress = "0x7b39712Ef45F7dcED2bBDF11F3D5046bA61dA719"
            .parse()
            .unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        let back: EvmAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(addr, back);
    }

    #[test]
    fn zero_address_is_zero() {
        let addr: EvmAddress = "0x0000000000000000000000000000000000000000"
            .parse()
            .unwrap();
        assert!(addr.is_zero());
    }

    #[test]
    fn token_amount_decimal_round_trip() {
        let amount: TokenAmount = "123456789012345678901234567890".parse().unwrap();
        assert_eq!(amount.to_string(), "123456789012345678901234567890");
    }

    #[test]
    fn token_amount_json_is_a_string() {
        let amount = TokenAmount(U256::from(42u64));
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"42\"");
    }
}
