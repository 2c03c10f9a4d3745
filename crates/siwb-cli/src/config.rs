/*
[INPUT]:  YAML configuration file
[OUTPUT]: Parsed CLI configuration (authority, machine, store, wallet)
[POS]:    Configuration layer - CLI setup
[UPDATE]: When adding new configuration options
*/

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use siwb_auth::{
    AuthConfig, AuthorityHttpClient, BitcoinNetwork, ClientConfig, FileCredentialStore,
};

/// Top-level configuration of the `siwb` binary
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CliConfig {
    /// Delegation authority endpoint
    pub authority: AuthorityConfig,
    /// State machine tuning
    #[serde(default)]
    pub auth: AuthConfig,
    /// Directory holding the session files, `./.siwb/session` when absent
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
    /// Account used by the manual wallet
    #[serde(default)]
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthorityConfig {
    /// Base URL the `/siwb/...` endpoints hang off
    pub base_url: String,
    #[serde(flatten)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WalletConfig {
    /// Address to sign in with; prompted for when absent
    #[serde(default)]
    pub address: Option<String>,
    /// Network token reported by the wallet
    #[serde(default = "default_network")]
    pub network: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            address: None,
            network: default_network(),
        }
    }
}

fn default_network() -> String {
    "livenet".to_string()
}

impl CliConfig {
    /// Load configuration from YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        AuthorityHttpClient::with_config(self.authority.client.clone(), &self.authority.base_url)
            .context("authority.base_url")?;
        self.auth.validate().context("auth")?;
        let network = BitcoinNetwork::from_token(&self.wallet.network)
            .ok_or_else(|| anyhow!("wallet.network: unknown network {}", self.wallet.network))?;
        if let Some(address) = &self.wallet.address {
            let info = siwb_auth::classify(address).context("wallet.address")?;
            if info.network != network {
                bail!("wallet.address is a {} address but wallet.network is {network}", info.network);
            }
        }
        Ok(())
    }

    pub fn store_dir(&self) -> PathBuf {
        self.store_dir
            .clone()
            .unwrap_or_else(FileCredentialStore::default_dir)
    }
}

/// `--config` when given, else `<config dir>/siwb/config.yaml` if it exists
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let fallback = dirs::config_dir()?.join("siwb").join("config.yaml");
    fallback.exists().then_some(fallback)
}
