/*
[INPUT]:  DER-encoded root public keys or raw principal bytes
[OUTPUT]: Self-authenticating principals and their textual form
[POS]:    Auth layer - identity naming for delegated credentials
[UPDATE]: When the principal derivation or text encoding changes
*/

use std::fmt::{self, Write};
use std::str::FromStr;

use data_encoding::BASE32_NOPAD;
use sha2::{Digest, Sha224};

use crate::http::{AuthError, Result};

const SELF_AUTHENTICATING_TAG: u8 = 0x02;
const MAX_PRINCIPAL_LEN: usize = 29;

/// Identity name derived from a public key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Principal(Vec<u8>);

impl Principal {
    /// SHA-224 of the DER public key followed by the self-authenticating tag
    pub fn self_authenticating(der_public_key: &[u8]) -> Self {
        let mut bytes = Sha224::digest(der_public_key).to_vec();
        bytes.push(SELF_AUTHENTICATING_TAG);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_PRINCIPAL_LEN {
            return Err(AuthError::InvalidResponse(format!(
                "principal is {} bytes, at most {MAX_PRINCIPAL_LEN} allowed",
                bytes.len()
            )));
        }
        Ok(Self(bytes.to_vec()))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Principal {
    /// Checksummed base32 text, grouped in blocks of five
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut buf = crc32fast::hash(&self.0).to_be_bytes().to_vec();
        buf.extend_from_slice(&self.0);
        let encoded = BASE32_NOPAD.encode(&buf).to_ascii_lowercase();

        for (index, c) in encoded.chars().enumerate() {
            if index > 0 && index % 5 == 0 {
                f.write_char('-')?;
            }
            f.write_char(c)?;
        }
        Ok(())
    }
}

impl FromStr for Principal {
    type Err = AuthError;

    fn from_str(text: &str) -> Result<Self> {
        let compact: String = text
            .chars()
            .filter(|c| *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();
        let decoded = BASE32_NOPAD
            .decode(compact.as_bytes())
            .map_err(|e| AuthError::InvalidResponse(format!("invalid principal text: {e}")))?;
        if decoded.len() < 4 {
            return Err(AuthError::InvalidResponse(
                "principal text too short".to_string(),
            ));
        }

        let (checksum, bytes) = decoded.split_at(4);
        if checksum != crc32fast::hash(bytes).to_be_bytes() {
            return Err(AuthError::InvalidResponse(
                "principal checksum mismatch".to_string(),
            ));
        }
        let principal = Self::from_slice(bytes)?;
        if principal.to_string() != text {
            return Err(AuthError::InvalidResponse(format!(
                "principal text is not canonical: {text}"
            )));
        }
        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_principal_text() {
        let anonymous = Principal::from_slice(&[0x04]).unwrap();
        assert_eq!(anonymous.to_string(), "2vxsx-fae");
    }

    #[test]
    fn test_management_principal_text() {
        let management = Principal::from_slice(&[]).unwrap();
        assert_eq!(management.to_string(), "aaaaa-aa");
    }

    #[test]
    fn test_self_authenticating_shape() {
        let principal = Principal::self_authenticating(&[0x30, 0x2a, 0x01]);
        assert_eq!(principal.as_slice().len(), MAX_PRINCIPAL_LEN);
        assert_eq!(principal.as_slice()[28], SELF_AUTHENTICATING_TAG);
    }

    #[test]
    fn test_text_roundtrip_and_checksum() {
        let principal = Principal::self_authenticating(b"root key");
        let text = principal.to_string();
        assert_eq!(text.parse::<Principal>().unwrap(), principal);
        let groups: Vec<&str> = text.split('-').collect();
        assert!(groups[..groups.len() - 1].iter().all(|group| group.len() == 5));

        let mut tampered = text.clone().into_bytes();
        let last = tampered.len() - 1;
        tampered[last] = if tampered[last] == b'a' { b'b' } else { b'a' };
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(tampered.parse::<Principal>().is_err());
    }
}
