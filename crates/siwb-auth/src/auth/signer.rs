/*
[INPUT]:  Fresh randomness or stored secret key bytes
[OUTPUT]: Ephemeral Ed25519 session keypairs, DER public keys, signatures
[POS]:    Auth layer - session key the delegation is issued to
[UPDATE]: When changing the session key algorithm or its public key encoding
*/

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use rand::rngs::OsRng;

/// SubjectPublicKeyInfo prefix for an Ed25519 key (RFC 8410)
const ED25519_DER_PREFIX: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Ephemeral Ed25519 keypair generated for a single sign-in attempt.
///
/// It is never derived from the wallet's key and cannot reconstruct it.
#[derive(Clone)]
pub struct SessionKeypair {
    signing_key: SigningKey,
}

impl SessionKeypair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore a keypair from secret key bytes (32 bytes)
    pub fn from_secret_key(bytes: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(bytes);
        Self { signing_key }
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Short printable key id for log fields
    pub fn public_key_base58(&self) -> String {
        let verifying_key = self.signing_key.verifying_key();
        bs58::encode(verifying_key.as_bytes()).into_string()
    }

    /// Get the raw public key bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// DER-encoded public key, the form the authority delegates to
    pub fn public_key_der(&self) -> Vec<u8> {
        let mut der = Vec::with_capacity(ED25519_DER_PREFIX.len() + 32);
        der.extend_from_slice(&ED25519_DER_PREFIX);
        der.extend_from_slice(&self.public_key_bytes());
        der
    }

    /// Get the raw secret key bytes
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.signing_key
            .verifying_key()
            .verify(message, signature)
            .is_ok()
    }
}

impl fmt::Debug for SessionKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeypair")
            .field("public_key", &self.public_key_base58())
            .finish_non_exhaustive()
    }
}
