/*
[INPUT]:  Session keypair, delegation chain, bound address
[OUTPUT]: Durable session credentials and restored delegated identities
[POS]:    Auth layer - persistence contract for resuming a session
[UPDATE]: When the stored key layout or file naming conventions change
*/

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, warn};

use crate::auth::{DelegatedIdentity, DelegationChain, SessionKeypair};
use crate::http::{AuthError, Result};

const IDENTITY_KEY: &str = "identity.key";
const DELEGATION_KEY: &str = "delegation.json";
const ADDRESS_KEY: &str = "address";

/// A session restored from storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub identity: DelegatedIdentity,
    pub address: String,
}

impl StoredSession {
    pub fn chain(&self) -> &DelegationChain {
        self.identity.chain()
    }
}

/// Durable key-value persistence for a signed-in session.
///
/// Identity material, delegation chain and address live under independent
/// keys; a load that finds any of them missing reports no session.
#[async_trait]
pub trait SessionCredentialStore: Send + Sync {
    async fn save(
        &self,
        keypair: &SessionKeypair,
        chain: &DelegationChain,
        address: &str,
    ) -> Result<()>;

    async fn load(&self) -> Result<Option<StoredSession>>;

    async fn clear(&self) -> Result<()>;
}

/// Load the stored session, discarding it when the delegation has expired
pub async fn restore_session(
    store: &dyn SessionCredentialStore,
    now: DateTime<Utc>,
) -> Result<Option<StoredSession>> {
    match store.load().await? {
        Some(session) if session.identity.is_expired(now) => {
            debug!(address = %session.address, "stored delegation expired");
            Ok(None)
        }
        other => Ok(other),
    }
}

fn encode_entries(
    keypair: &SessionKeypair,
    chain: &DelegationChain,
    address: &str,
) -> Result<[(&'static str, String); 3]> {
    Ok([
        (IDENTITY_KEY, STANDARD.encode(keypair.secret_key_bytes())),
        (DELEGATION_KEY, chain.to_json()?),
        (ADDRESS_KEY, address.to_string()),
    ])
}

/// Rebuild a session from the three raw entries; `None` when any is invalid
fn decode_entries(identity: &str, delegation: &str, address: &str) -> Option<StoredSession> {
    let bytes = STANDARD.decode(identity.trim()).ok()?;
    let key_bytes: [u8; 32] = bytes.as_slice().try_into().ok()?;
    let chain = match DelegationChain::from_json(delegation) {
        Ok(chain) => chain,
        Err(err) => {
            warn!(error = %err, "stored delegation chain is unreadable");
            return None;
        }
    };
    let address = address.trim();
    if address.is_empty() {
        return None;
    }

    Some(StoredSession {
        identity: DelegatedIdentity::new(SessionKeypair::from_secret_key(&key_bytes), chain),
        address: address.to_string(),
    })
}

/// Stores the session as three files in a directory
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    /// Create a store rooted at the given directory
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Default: `./.siwb/session` relative to the current working directory.
    pub fn default_dir() -> PathBuf {
        let base_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        base_dir.join(".siwb").join("session")
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Get the expected file path for one of the session keys
    pub fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    /// Temporary path a key is staged at before it replaces the stored entry
    pub fn staging_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.tmp"))
    }

    /// Write every entry next to its final path without touching stored ones
    async fn stage_entries(&self, entries: &[(&'static str, String)]) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await?;
        for (key, value) in entries {
            let path = self.staging_path(key);
            fs::write(&path, value).await?;
            if *key == IDENTITY_KEY {
                restrict_permissions(&path).await?;
            }
        }
        Ok(())
    }

    /// Move staged entries into place. On failure the entries already moved
    /// get their previous content back.
    async fn commit_entries(
        &self,
        previous: &[(&'static str, Option<String>)],
    ) -> io::Result<()> {
        for (index, (key, _)) in previous.iter().enumerate() {
            if let Err(err) = fs::rename(self.staging_path(key), self.entry_path(key)).await {
                for (key, content) in &previous[..index] {
                    if let Err(restore) = self.restore_entry(key, content.as_deref()).await {
                        warn!(key, error = %restore, "failed to restore session entry");
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    async fn restore_entry(&self, key: &str, content: Option<&str>) -> io::Result<()> {
        let path = self.entry_path(key);
        match content {
            Some(content) => {
                fs::write(&path, content).await?;
                if key == IDENTITY_KEY {
                    restrict_permissions(&path).await?;
                }
                Ok(())
            }
            None => remove_if_present(&path).await,
        }
    }

    async fn discard_staged(&self) {
        for key in [IDENTITY_KEY, DELEGATION_KEY, ADDRESS_KEY] {
            if let Err(err) = remove_if_present(&self.staging_path(key)).await {
                debug!(key, error = %err, "staged entry left behind");
            }
        }
    }

    async fn snapshot(&self) -> io::Result<Vec<(&'static str, Option<String>)>> {
        let mut previous = Vec::with_capacity(3);
        for key in [IDENTITY_KEY, DELEGATION_KEY, ADDRESS_KEY] {
            previous.push((key, self.read_entry(key).await?));
        }
        Ok(previous)
    }

    async fn read_entry(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.entry_path(key)).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn remove_entries(&self) -> io::Result<()> {
        for key in [IDENTITY_KEY, DELEGATION_KEY, ADDRESS_KEY] {
            remove_if_present(&self.entry_path(key)).await?;
        }
        Ok(())
    }
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms).await
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[async_trait]
impl SessionCredentialStore for FileCredentialStore {
    async fn save(
        &self,
        keypair: &SessionKeypair,
        chain: &DelegationChain,
        address: &str,
    ) -> Result<()> {
        let entries = encode_entries(keypair, chain, address)?;
        let unavailable = |err: io::Error| {
            AuthError::StoreUnavailable(format!("write to {}: {err}", self.dir.display()))
        };

        let previous = self.snapshot().await.map_err(unavailable)?;
        if let Err(err) = self.stage_entries(&entries).await {
            self.discard_staged().await;
            return Err(unavailable(err));
        }
        if let Err(err) = self.commit_entries(&previous).await {
            self.discard_staged().await;
            return Err(unavailable(err));
        }
        debug!(dir = %self.dir.display(), %address, "session saved");
        Ok(())
    }

    async fn load(&self) -> Result<Option<StoredSession>> {
        let read = |err: io::Error| {
            AuthError::StoreUnavailable(format!("read from {}: {err}", self.dir.display()))
        };
        let identity = self.read_entry(IDENTITY_KEY).await.map_err(read)?;
        let delegation = self.read_entry(DELEGATION_KEY).await.map_err(read)?;
        let address = self.read_entry(ADDRESS_KEY).await.map_err(read)?;

        match (identity, delegation, address) {
            (Some(identity), Some(delegation), Some(address)) => {
                Ok(decode_entries(&identity, &delegation, &address))
            }
            _ => Ok(None),
        }
    }

    async fn clear(&self) -> Result<()> {
        self.remove_entries().await.map_err(|err| {
            AuthError::StoreUnavailable(format!("clear {}: {err}", self.dir.display()))
        })
    }
}

/// In-memory store for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<&'static str, String>>,
    fail_writes: RwLock<bool>,
    writes: RwLock<usize>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `save` fail with `StoreUnavailable`
    pub fn set_fail_writes(&self, fail: bool) {
        if let Ok(mut guard) = self.fail_writes.write() {
            *guard = fail;
        }
    }

    /// Number of successful saves so far
    pub fn write_count(&self) -> usize {
        self.writes.read().map(|guard| *guard).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().map(|guard| guard.is_empty()).unwrap_or(true)
    }

    /// Drop a single key, simulating a partial write
    pub fn remove_entry(&self, key: &str) {
        if let Ok(mut guard) = self.entries.write() {
            guard.retain(|k, _| *k != key);
        }
    }

    fn poisoned() -> AuthError {
        AuthError::StoreUnavailable("memory store lock poisoned".to_string())
    }
}

#[async_trait]
impl SessionCredentialStore for MemoryCredentialStore {
    async fn save(
        &self,
        keypair: &SessionKeypair,
        chain: &DelegationChain,
        address: &str,
    ) -> Result<()> {
        if self.fail_writes.read().map(|guard| *guard).unwrap_or(false) {
            return Err(AuthError::StoreUnavailable("memory store is read-only".to_string()));
        }
        let entries = encode_entries(keypair, chain, address)?;
        let mut guard = self.entries.write().map_err(|_| Self::poisoned())?;
        guard.clear();
        guard.extend(entries);
        drop(guard);

        let mut writes = self.writes.write().map_err(|_| Self::poisoned())?;
        *writes += 1;
        Ok(())
    }

    async fn load(&self) -> Result<Option<StoredSession>> {
        let guard = self.entries.read().map_err(|_| Self::poisoned())?;
        match (
            guard.get(IDENTITY_KEY),
            guard.get(DELEGATION_KEY),
            guard.get(ADDRESS_KEY),
        ) {
            (Some(identity), Some(delegation), Some(address)) => {
                Ok(decode_entries(identity, delegation, address))
            }
            _ => Ok(None),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut guard = self.entries.write().map_err(|_| Self::poisoned())?;
        guard.clear();
        Ok(())
    }
}
