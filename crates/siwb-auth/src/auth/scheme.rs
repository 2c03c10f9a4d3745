/*
[INPUT]:  Wallet provider key and bound address
[OUTPUT]: Signature scheme the authority should expect
[POS]:    Auth layer - signature type selection (vendor compatibility table)
[UPDATE]: When a wallet vendor gains or loses BIP-322 support
*/

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::address::{AddressFormat, classify};
use crate::http::Result;

/// Providers known to sign taproot/segwit-v1 messages with BIP-322
pub const DEFAULT_BIP322_PROVIDERS: &[&str] = &["wizz", "unisat"];

/// Signature scheme used by the wallet for the sign-in challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureScheme {
    #[serde(rename = "ECDSA")]
    Ecdsa,
    #[serde(rename = "Bip322Simple")]
    Bip322Simple,
}

impl SignatureScheme {
    /// Wire name understood by the authority
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureScheme::Ecdsa => "ECDSA",
            SignatureScheme::Bip322Simple => "Bip322Simple",
        }
    }
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chooses the signature scheme from the provider allow-list and the
/// address format.
///
/// Providers outside the allow-list are treated as ECDSA-only regardless of
/// the address they expose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureTypeSelector {
    bip322_providers: BTreeSet<String>,
}

impl SignatureTypeSelector {
    pub fn new<I, S>(bip322_providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bip322_providers: bip322_providers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn supports_bip322(&self, provider_key: &str) -> bool {
        self.bip322_providers.contains(provider_key)
    }

    /// Decide the scheme for `address` signed by `provider_key`.
    ///
    /// Fails with `UnrecognizedAddress` when the address cannot be classified.
    pub fn select(&self, provider_key: &str, address: &str) -> Result<SignatureScheme> {
        let info = classify(address)?;
        let taproot_path = matches!(info.format, AddressFormat::P2tr | AddressFormat::P2wpkh);

        if self.supports_bip322(provider_key) && taproot_path {
            Ok(SignatureScheme::Bip322Simple)
        } else {
            Ok(SignatureScheme::Ecdsa)
        }
    }
}

impl Default for SignatureTypeSelector {
    fn default() -> Self {
        Self::new(DEFAULT_BIP322_PROVIDERS.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::AuthError;
    use rstest::rstest;

    const P2TR: &str = "bc1pgvdp7lf89d62zadds5jvyjntxmr7v70yv33g7vqaeu2p0cuexveq9hcwdv";
    const P2WPKH: &str = "bc1qshqyem2rf8jyla904gd2cvek2k8nz5z3x73p24";
    const P2PKH: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
    const P2SH: &str = "3L3aWoYtxUMa7szaGhjuGAcJap9Hb13EEP";

    #[rstest]
    #[case("wizz", P2TR, SignatureScheme::Bip322Simple)]
    #[case("wizz", P2WPKH, SignatureScheme::Bip322Simple)]
    #[case("wizz", P2PKH, SignatureScheme::Ecdsa)]
    #[case("wizz", P2SH, SignatureScheme::Ecdsa)]
    #[case("unisat", P2TR, SignatureScheme::Bip322Simple)]
    #[case("unisat", P2WPKH, SignatureScheme::Bip322Simple)]
    #[case("unisat", P2PKH, SignatureScheme::Ecdsa)]
    #[case("unisat", P2SH, SignatureScheme::Ecdsa)]
    #[case("okx", P2TR, SignatureScheme::Ecdsa)]
    #[case("okx", P2WPKH, SignatureScheme::Ecdsa)]
    #[case("okx", P2PKH, SignatureScheme::Ecdsa)]
    #[case("okx", P2SH, SignatureScheme::Ecdsa)]
    fn test_select_cross_product(
        #[case] provider: &str,
        #[case] address: &str,
        #[case] expected: SignatureScheme,
    ) {
        let selector = SignatureTypeSelector::default();
        assert_eq!(selector.select(provider, address).unwrap(), expected);
    }

    #[test]
    fn test_custom_allow_list() {
        let selector = SignatureTypeSelector::new(["xverse"]);
        assert_eq!(
            selector.select("xverse", P2TR).unwrap(),
            SignatureScheme::Bip322Simple
        );
        assert_eq!(selector.select("wizz", P2TR).unwrap(), SignatureScheme::Ecdsa);
    }

    #[test]
    fn test_select_unrecognized_address() {
        let selector = SignatureTypeSelector::default();
        let err = selector.select("okx", "not-an-address").unwrap_err();
        assert!(matches!(err, AuthError::UnrecognizedAddress(_)));
    }

    #[test]
    fn test_scheme_wire_names() {
        assert_eq!(
            serde_json::to_string(&SignatureScheme::Bip322Simple).unwrap(),
            "\"Bip322Simple\""
        );
        assert_eq!(
            serde_json::to_string(&SignatureScheme::Ecdsa).unwrap(),
            "\"ECDSA\""
        );
    }
}
