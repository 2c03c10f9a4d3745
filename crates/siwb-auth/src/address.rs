/*
[INPUT]:  Bitcoin address strings
[OUTPUT]: Address format and network classification
[POS]:    Leaf module - pure prefix classifier, no dependencies
[UPDATE]: When supporting new address formats or networks
*/

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::http::{AuthError, Result};

/// On-chain script/encoding family of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressFormat {
    P2pkh,
    P2wpkh,
    P2tr,
    P2shP2wpkh,
}

impl fmt::Display for AddressFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AddressFormat::P2pkh => "P2PKH",
            AddressFormat::P2wpkh => "P2WPKH",
            AddressFormat::P2tr => "P2TR",
            AddressFormat::P2shP2wpkh => "P2SH-P2WPKH",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitcoinNetwork {
    Main,
    Test,
}

impl BitcoinNetwork {
    /// Interpret a wallet network token ("livenet", "testnet", ...)
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "livenet" | "mainnet" | "bitcoin" | "main" => Some(BitcoinNetwork::Main),
            "testnet" | "testnet4" | "signet" | "test" => Some(BitcoinNetwork::Test),
            _ => None,
        }
    }
}

impl fmt::Display for BitcoinNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BitcoinNetwork::Main => f.write_str("main"),
            BitcoinNetwork::Test => f.write_str("test"),
        }
    }
}

/// Result of classifying an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressInfo {
    pub format: AddressFormat,
    pub network: BitcoinNetwork,
}

// (prefix, format, network), checked in order.
const PREFIXES: &[(&str, AddressFormat, BitcoinNetwork)] = &[
    ("bc1q", AddressFormat::P2wpkh, BitcoinNetwork::Main),
    ("bc1p", AddressFormat::P2tr, BitcoinNetwork::Main),
    ("tb1q", AddressFormat::P2wpkh, BitcoinNetwork::Test),
    ("tb1p", AddressFormat::P2tr, BitcoinNetwork::Test),
    ("1", AddressFormat::P2pkh, BitcoinNetwork::Main),
    ("3", AddressFormat::P2shP2wpkh, BitcoinNetwork::Main),
    ("m", AddressFormat::P2pkh, BitcoinNetwork::Test),
    ("n", AddressFormat::P2pkh, BitcoinNetwork::Test),
    ("2", AddressFormat::P2shP2wpkh, BitcoinNetwork::Test),
];

/// Classify an address by its literal prefix.
///
/// Bech32 addresses may be written entirely in upper case; base58 prefixes
/// are matched as written.
pub fn classify(address: &str) -> Result<AddressInfo> {
    let address = address.trim();
    let bech32_lowered;
    let candidate = if is_uppercase_bech32(address) {
        bech32_lowered = address.to_ascii_lowercase();
        bech32_lowered.as_str()
    } else {
        address
    };

    PREFIXES
        .iter()
        .find(|(prefix, _, _)| candidate.len() > prefix.len() && candidate.starts_with(prefix))
        .map(|&(_, format, network)| AddressInfo { format, network })
        .ok_or_else(|| AuthError::UnrecognizedAddress(address.to_string()))
}

fn is_uppercase_bech32(address: &str) -> bool {
    (address.starts_with("BC1") || address.starts_with("TB1"))
        && !address.chars().any(|c| c.is_ascii_lowercase())
}
