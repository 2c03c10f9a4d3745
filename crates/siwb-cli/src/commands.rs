/*
[INPUT]:  Parsed CLI configuration and subcommand arguments
[OUTPUT]: Classification, scheme choice, sign-in result, stored session info
[POS]:    Command layer - what each `siwb` subcommand does
[UPDATE]: When adding subcommands or changing their output
*/

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use console::style;
use serde::Serialize;
use siwb_auth::auth::restore_session;
use siwb_auth::machine::AuthEvent;
use siwb_auth::{
    AuthConfig, AuthError, AuthMachine, AuthState, AuthorityClient, AuthorityHttpClient, Command,
    DelegatedIdentity, FileCredentialStore, HttpAuthorityClient, Principal, ProviderRegistry,
    SessionCredentialStore, SignatureScheme, classify,
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::cli::ManualWallet;
use crate::config::CliConfig;

/// "P2TR (main)" style description of an address
pub fn describe_address(address: &str) -> Result<String> {
    let info = classify(address)?;
    Ok(format!("{} ({})", info.format, info.network))
}

/// Scheme `provider` would be asked to sign `address` with
pub fn select_scheme(auth: &AuthConfig, provider: &str, address: &str) -> Result<SignatureScheme> {
    Ok(auth.selector().select(provider, address)?)
}

pub fn authority_client(config: &CliConfig) -> Result<HttpAuthorityClient> {
    let client =
        AuthorityHttpClient::with_config(config.authority.client.clone(), &config.authority.base_url)
            .context("build authority client")?;
    Ok(HttpAuthorityClient::new(client))
}

pub fn credential_store(config: &CliConfig) -> FileCredentialStore {
    FileCredentialStore::new(config.store_dir())
}

/// Run one sign-in attempt with the operator acting as the wallet
pub async fn login(
    config: &CliConfig,
    provider: &str,
    address: Option<String>,
) -> Result<DelegatedIdentity> {
    let wallet = ManualWallet::new(
        address.or_else(|| config.wallet.address.clone()),
        config.wallet.network.clone(),
    );
    let registry = ProviderRegistry::new().with(provider, Arc::new(wallet));
    let authority = authority_client(config)?;
    let store = credential_store(config);
    info!(
        provider,
        authority = %config.authority.base_url,
        store = %store.dir().display(),
        "starting sign-in"
    );

    let mut machine = AuthMachine::new(registry, Arc::new(authority), Arc::new(store), &config.auth);
    let mut events = machine.subscribe();
    let state = machine.dispatch(Command::connect(provider)).await;

    let failure = report_events(&mut events);

    match (state, machine.identity()) {
        (AuthState::Authenticated, Some(identity)) => Ok(identity.clone()),
        _ => Err(failure
            .map(anyhow::Error::new)
            .unwrap_or_else(|| anyhow!("sign-in ended in state {state}"))),
    }
}

/// Print the events of a finished attempt; returns the failure cause, if any
pub fn report_events(events: &mut broadcast::Receiver<AuthEvent>) -> Option<AuthError> {
    let mut failure = None;
    loop {
        let event = match events.try_recv() {
            Ok(event) => event,
            Err(TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "sign-in events dropped, raise auth.event_buffer");
                continue;
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        };
        match event {
            AuthEvent::Connected {
                address, network, ..
            } => println!(
                "{} {address} on {}",
                style("connected").green(),
                network.chain_id
            ),
            AuthEvent::SignDataPrepared { challenge } => {
                debug!(bytes = challenge.len(), "challenge prepared")
            }
            AuthEvent::SignatureSettled { scheme, .. } => {
                println!("{} ({scheme})", style("signature accepted by wallet").green())
            }
            AuthEvent::Authenticated { identity } => {
                println!("{} {}", style("authenticated as").green(), identity.principal())
            }
            AuthEvent::Error { cause } => {
                println!("{} {cause}", style("sign-in failed:").red());
                failure = Some(cause);
            }
        }
    }
    failure
}

/// Printable view of a stored session
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub address: String,
    pub principal: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub session_key: String,
}

impl SessionSummary {
    pub fn new(address: &str, identity: &DelegatedIdentity) -> Self {
        Self {
            address: address.to_string(),
            principal: identity.principal().to_string(),
            expires_at: identity.chain().expires_at(),
            session_key: identity.keypair().public_key_base58(),
        }
    }
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "address:     {}", self.address)?;
        writeln!(f, "principal:   {}", self.principal)?;
        match self.expires_at {
            Some(expires_at) => writeln!(f, "expires at:  {}", expires_at.to_rfc3339())?,
            None => writeln!(f, "expires at:  unknown")?,
        }
        write!(f, "session key: {}", self.session_key)
    }
}

/// Stored session that has not yet expired
pub async fn session_show(store: &dyn SessionCredentialStore) -> Result<Option<SessionSummary>> {
    let session = restore_session(store, Utc::now())
        .await
        .context("load stored session")?;
    Ok(session.map(|session| SessionSummary::new(&session.address, &session.identity)))
}

pub async fn session_clear(store: &dyn SessionCredentialStore) -> Result<()> {
    store.clear().await.context("clear stored session")
}

pub async fn whois(authority: &dyn AuthorityClient, address: &str) -> Result<Principal> {
    classify(address)?;
    authority
        .get_principal(address)
        .await
        .with_context(|| format!("look up principal of {address}"))
}
