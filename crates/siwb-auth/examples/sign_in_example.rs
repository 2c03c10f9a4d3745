/*
[INPUT]:  In-memory wallet and authority stand-ins
[OUTPUT]: Delegated identity printed to stdout
[POS]:    Examples - sign-in flow demonstration
[UPDATE]: When the machine surface or event order changes
*/

use std::sync::Arc;

use siwb_auth::*;

/// Example: Sign in with a Bitcoin address
///
/// 1. Register a wallet adapter under a provider key
/// 2. Spawn the auth machine
/// 3. Connect, sign the challenge, receive a delegation
/// 4. Refresh the delegation without reconnecting
#[tokio::main]
async fn main() {
    println!("=== Sign In With Bitcoin Example ===\n");

    let address = "bc1pgvdp7lf89d62zadds5jvyjntxmr7v70yv33g7vqaeu2p0cuexveq9hcwdv";
    let registry = ProviderRegistry::new().with(
        "unisat",
        Arc::new(MockWallet::new(address, "AUAbase64sig==", "02ab")),
    );
    let authority = MockAuthority::new("Sign in to example.org", b"root-key", u64::MAX);
    let store = Arc::new(MemoryCredentialStore::new());
    println!("✓ Wallet, authority and store ready");

    let machine = AuthMachine::new(registry, Arc::new(authority), store, &AuthConfig::default());
    let handle = machine.spawn();
    let mut events = handle.subscribe();

    let identity = match handle.authenticate("unisat").await {
        Ok(identity) => identity,
        Err(e) => {
            eprintln!("Sign-in failed: {}", e);
            return;
        }
    };
    while let Ok(event) = events.try_recv() {
        println!("  event: {:?}", event);
    }
    println!("✓ Signed in as {}", identity.principal());
    println!("  Session key: {}", identity.keypair().public_key_base58());

    match handle.refresh().await {
        Ok(refreshed) => println!("✓ Refreshed, new session key {}", refreshed.keypair().public_key_base58()),
        Err(e) => eprintln!("Refresh failed: {}", e),
    }

    handle.shutdown().await;
    println!("\n✓ Sign-in example complete");
}
