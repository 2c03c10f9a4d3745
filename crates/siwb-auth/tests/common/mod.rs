/*
[INPUT]:  Test configuration and mock server requirements
[OUTPUT]: Shared fixtures, mock wallets, authorities and machines
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for siwb-auth tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use siwb_auth::{
    AuthConfig, AuthMachine, AuthorityClient, MemoryCredentialStore, MockAuthority, MockWallet,
    ProviderRegistry, SessionCredentialStore,
};
use uuid::Uuid;
use wiremock::MockServer;

pub const TAPROOT: &str = "bc1pgvdp7lf89d62zadds5jvyjntxmr7v70yv33g7vqaeu2p0cuexveq9hcwdv";
pub const SEGWIT: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";
pub const LEGACY: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

pub const WALLET_SIGNATURE: &str = "H1vYvAcV2bXh0m1p2pC8Y5rXgQ2z7lJd1hWUeNnX4v8J";
pub const WALLET_PUBLIC_KEY: &str =
    "02e6642fd69bd211f93f7f1f36ca51a26a5290eb2dd1b0d8279a87bb0d480c8443";

/// DER-encoded canister-signature root key used by the mock authority
pub const ROOT_PUBLIC_KEY: &[u8] = &[
    0x30, 0x3c, 0x30, 0x0c, 0x06, 0x0a, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x83, 0xb8, 0x43, 0x01,
    0x02, 0x03, 0x2c, 0x00, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x07, 0x01, 0x01,
];

/// Far enough in the future for restored sessions to stay valid
pub const FAR_EXPIRATION: u64 = 4_000_000_000_000_000_000;

/// Setup a mock HTTP server for testing
pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

pub fn mock_authority() -> MockAuthority {
    MockAuthority::new("Sign in to siwb", ROOT_PUBLIC_KEY, FAR_EXPIRATION)
}

pub fn mock_wallet(address: &str) -> MockWallet {
    MockWallet::new(address, WALLET_SIGNATURE, WALLET_PUBLIC_KEY)
}

/// Unique scratch directory under the system temp dir
pub fn temp_store_dir() -> PathBuf {
    std::env::temp_dir().join(format!("siwb-test-{}", Uuid::new_v4()))
}

pub fn machine_with(
    registry: ProviderRegistry,
    authority: Arc<dyn AuthorityClient>,
    store: Arc<dyn SessionCredentialStore>,
) -> AuthMachine {
    AuthMachine::new(registry, authority, store, &AuthConfig::default())
}

/// Machine with a single mock wallet under `provider_key`, backed by memory
pub fn memory_machine(
    provider_key: &str,
    wallet: MockWallet,
    authority: MockAuthority,
) -> (AuthMachine, Arc<MemoryCredentialStore>) {
    let store = Arc::new(MemoryCredentialStore::new());
    let registry = ProviderRegistry::new().with(provider_key, Arc::new(wallet));
    let machine = machine_with(registry, Arc::new(authority), store.clone());
    (machine, store)
}
