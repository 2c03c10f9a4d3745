/*
[INPUT]:  Challenge text and signature scheme
[OUTPUT]: Accounts, network token, signature and public key from a wallet
[POS]:    Auth layer - wallet integration abstraction
[UPDATE]: When adding new wallet operations or changing signature format
*/

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::auth::SignatureScheme;
use crate::auth::visibility::next_sequence;
use crate::http::{AuthError, Result};

/// Account or network change pushed by a wallet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<String>),
    NetworkChanged(String),
}

/// A [`WalletEvent`] stamped with when it fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletNotification {
    pub event: WalletEvent,
    sequence: u64,
}

impl WalletNotification {
    /// Stamp `event` as firing now. Adapters call this from the wallet's
    /// callback, not when the event is later read.
    pub fn new(event: WalletEvent) -> Self {
        Self {
            event,
            sequence: next_sequence(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Minimal operations the sign-in flow needs from a wallet adapter.
///
/// Implement this trait once per wallet vendor. Every call may fail
/// independently; adapters map a declined prompt to `UserRejected`.
#[async_trait]
pub trait WalletCapability: Send + Sync {
    /// Ask the wallet to reveal its accounts, first one is the active account.
    ///
    /// An empty list means the user declined.
    async fn request_accounts(&self) -> Result<Vec<String>>;

    /// Network token reported by the wallet ("livenet", "testnet", ...)
    async fn get_network(&self) -> Result<String>;

    /// Sign an opaque text challenge with the requested scheme
    async fn sign_message(&self, message: &str, scheme: SignatureScheme) -> Result<String>;

    /// Hex-encoded public key of the active account
    async fn get_public_key(&self) -> Result<String>;

    /// Subscribe to account/network changes, if the wallet pushes them.
    ///
    /// Dropping the receiver unsubscribes.
    fn subscribe(&self) -> Option<broadcast::Receiver<WalletNotification>> {
        None
    }
}

/// Wallet call a [`MockWallet`] should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Accounts,
    Network,
    Sign,
    PublicKey,
}

/// Scripted wallet for tests and demos
#[derive(Debug, Clone)]
pub struct MockWallet {
    accounts: Vec<String>,
    network: String,
    signature: String,
    public_key: String,
    failure: Option<MockFailure>,
    sign_delay: Option<Duration>,
    connect_events: Vec<WalletEvent>,
    events: broadcast::Sender<WalletNotification>,
    sign_calls: Arc<Mutex<Vec<(String, SignatureScheme)>>>,
}

impl MockWallet {
    /// Create a mock exposing a single account with a predetermined signature
    pub fn new(address: &str, signature: &str, public_key: &str) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            accounts: vec![address.to_string()],
            network: "livenet".to_string(),
            signature: signature.to_string(),
            public_key: public_key.to_string(),
            failure: None,
            sign_delay: None,
            connect_events: Vec::new(),
            events,
            sign_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_accounts(mut self, accounts: &[&str]) -> Self {
        self.accounts = accounts.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_network(mut self, network: &str) -> Self {
        self.network = network.to_string();
        self
    }

    pub fn failing_on(mut self, failure: MockFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Delay every sign request, to simulate a prompt left open
    pub fn with_sign_delay(mut self, delay: Duration) -> Self {
        self.sign_delay = Some(delay);
        self
    }

    /// Push `event` while the account prompt is open, as if the user
    /// switched accounts before approving
    pub fn emitting_on_connect(mut self, event: WalletEvent) -> Self {
        self.connect_events.push(event);
        self
    }

    /// Push a change notification to current subscribers
    pub fn emit(&self, event: WalletEvent) {
        let _ = self.events.send(WalletNotification::new(event));
    }

    /// Messages and schemes this wallet was asked to sign, in order
    pub fn sign_calls(&self) -> Vec<(String, SignatureScheme)> {
        self.sign_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn check(&self, call: MockFailure) -> Result<()> {
        if self.failure == Some(call) {
            Err(AuthError::UserRejected(format!("mock wallet declined {call:?}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl WalletCapability for MockWallet {
    async fn request_accounts(&self) -> Result<Vec<String>> {
        self.check(MockFailure::Accounts)?;
        for event in &self.connect_events {
            self.emit(event.clone());
        }
        Ok(self.accounts.clone())
    }

    async fn get_network(&self) -> Result<String> {
        self.check(MockFailure::Network)?;
        Ok(self.network.clone())
    }

    async fn sign_message(&self, message: &str, scheme: SignatureScheme) -> Result<String> {
        if let Ok(mut calls) = self.sign_calls.lock() {
            calls.push((message.to_string(), scheme));
        }
        if let Some(delay) = self.sign_delay {
            tokio::time::sleep(delay).await;
        }
        self.check(MockFailure::Sign)?;
        Ok(self.signature.clone())
    }

    async fn get_public_key(&self) -> Result<String> {
        self.check(MockFailure::PublicKey)?;
        Ok(self.public_key.clone())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<WalletNotification>> {
        Some(self.events.subscribe())
    }
}
