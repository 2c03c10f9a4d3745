/*
[INPUT]:  Authority delegation record, root public key, session keypair
[OUTPUT]: Delegation chain and the delegated identity built on it
[POS]:    Auth layer - session key delegation (pure, no I/O)
[UPDATE]: When the delegation wire shape or chain encoding changes
*/

//! Delegation chains
//!
//! The authority signs a statement that the session key may act for the
//! root identity until an expiration. A chain of length one is all a
//! sign-in produces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{Principal, SessionKeypair};
use crate::http::{AuthError, Result};

/// Delegation record as returned by the authority.
///
/// Every field is optional on the wire; [`DelegationChainBuilder`] rejects
/// records missing any required part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub delegation: Option<RawDelegation>,
    /// Hex-encoded authority signature over the delegation
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDelegation {
    /// Hex-encoded DER public key of the session key
    pub pubkey: Option<String>,
    /// Nanoseconds since the UNIX epoch
    pub expiration: Option<u64>,
    pub targets: Option<Vec<String>>,
}

/// Authorization of `pubkey` until `expiration`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    #[serde(with = "hex")]
    pub pubkey: Vec<u8>,
    pub expiration: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedDelegation {
    pub delegation: Delegation,
    #[serde(with = "hex")]
    pub signature: Vec<u8>,
}

/// Delegations leading from the root public key to the session key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationChain {
    pub delegations: Vec<SignedDelegation>,
    /// DER-encoded root public key
    #[serde(with = "hex")]
    pub public_key: Vec<u8>,
}

impl DelegationChain {
    /// Earliest expiration across the chain, in nanoseconds
    pub fn expiration(&self) -> u64 {
        self.delegations
            .iter()
            .map(|signed| signed.delegation.expiration)
            .min()
            .unwrap_or(0)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let nanos = self.expiration();
        DateTime::from_timestamp(
            (nanos / 1_000_000_000) as i64,
            (nanos % 1_000_000_000) as u32,
        )
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires_at) => now >= expires_at,
            None => true,
        }
    }

    /// Public key the last delegation is issued to
    pub fn session_public_key(&self) -> Option<&[u8]> {
        self.delegations
            .last()
            .map(|signed| signed.delegation.pubkey.as_slice())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Builds a single-link chain from an authority record
pub struct DelegationChainBuilder;

impl DelegationChainBuilder {
    /// Assemble the chain, checking only that every part is present
    pub fn build(record: &DelegationRecord, root_public_key: &[u8]) -> Result<DelegationChain> {
        let raw = record
            .delegation
            .as_ref()
            .ok_or_else(|| malformed("delegation body missing"))?;
        let signature = decode_field(record.signature.as_deref(), "signature")?;
        let pubkey = decode_field(raw.pubkey.as_deref(), "delegation pubkey")?;
        let expiration = raw
            .expiration
            .ok_or_else(|| malformed("delegation expiration missing"))?;
        if root_public_key.is_empty() {
            return Err(malformed("root public key missing"));
        }

        Ok(DelegationChain {
            delegations: vec![SignedDelegation {
                delegation: Delegation {
                    pubkey,
                    expiration,
                    targets: raw.targets.clone(),
                },
                signature,
            }],
            public_key: root_public_key.to_vec(),
        })
    }
}

fn malformed(reason: &str) -> AuthError {
    AuthError::MalformedDelegation(reason.to_string())
}

fn decode_field(value: Option<&str>, name: &str) -> Result<Vec<u8>> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| malformed(&format!("{name} missing")))?;
    let value = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(value).map_err(|e| malformed(&format!("{name} is not hex: {e}")))
}

/// Session keypair together with the chain that authorizes it
#[derive(Debug, Clone)]
pub struct DelegatedIdentity {
    keypair: SessionKeypair,
    chain: DelegationChain,
}

impl DelegatedIdentity {
    pub fn new(keypair: SessionKeypair, chain: DelegationChain) -> Self {
        Self { keypair, chain }
    }

    /// Principal of the root identity the session acts for
    pub fn principal(&self) -> Principal {
        Principal::self_authenticating(&self.chain.public_key)
    }

    pub fn chain(&self) -> &DelegationChain {
        &self.chain
    }

    pub fn keypair(&self) -> &SessionKeypair {
        &self.keypair
    }

    /// DER public key of the delegating root identity
    pub fn public_key(&self) -> &[u8] {
        &self.chain.public_key
    }

    /// Sign a request body with the session key
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.keypair.sign(message).to_bytes().to_vec()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.chain.is_expired(now)
    }
}

impl PartialEq for DelegatedIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.keypair.public_key_bytes() == other.keypair.public_key_bytes()
            && self.chain == other.chain
    }
}

impl Eq for DelegatedIdentity {}
