/*
[INPUT]:  Serialized machine settings (YAML/JSON section)
[OUTPUT]: Scheme selector, step timeout and event buffer size
[POS]:    Configuration layer - sign-in machine tuning
[UPDATE]: When adding new machine options
*/

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::{DEFAULT_BIP322_PROVIDERS, SignatureTypeSelector};
use crate::http::{AuthError, Result};

/// One day; a wallet prompt left open longer is treated as abandoned
pub const MAX_STEP_TIMEOUT_SECS: u64 = 86_400;

/// Settings of the sign-in state machine
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Providers that sign BIP322-simple for taproot and segwit addresses
    #[serde(default = "default_bip322_providers")]
    pub bip322_providers: Vec<String>,
    /// Upper bound for every wallet or authority step, in seconds
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bip322_providers: default_bip322_providers(),
            step_timeout_secs: default_step_timeout_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl AuthConfig {
    pub fn selector(&self) -> SignatureTypeSelector {
        SignatureTypeSelector::new(self.bip322_providers.iter().cloned())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.step_timeout_secs == 0 {
            return Err(AuthError::Config("step_timeout_secs must be positive".to_string()));
        }
        if self.step_timeout_secs > MAX_STEP_TIMEOUT_SECS {
            return Err(AuthError::Config(format!(
                "step_timeout_secs must be at most {MAX_STEP_TIMEOUT_SECS}"
            )));
        }
        if self.event_buffer == 0 {
            return Err(AuthError::Config("event_buffer must be positive".to_string()));
        }
        Ok(())
    }
}

fn default_bip322_providers() -> Vec<String> {
    DEFAULT_BIP322_PROVIDERS
        .iter()
        .map(|provider| provider.to_string())
        .collect()
}

fn default_step_timeout_secs() -> u64 {
    120
}

fn default_event_buffer() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_section() {
        let config: AuthConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AuthConfig::default());
        assert_eq!(config.step_timeout(), Duration::from_secs(120));
        assert!(config.selector().supports_bip322("wizz"));
        assert!(config.selector().supports_bip322("unisat"));
        assert!(!config.selector().supports_bip322("xverse"));
    }

    #[test]
    fn test_custom_allow_list() {
        let config: AuthConfig =
            serde_json::from_str(r#"{"bip322_providers": ["xverse"], "step_timeout_secs": 5}"#)
                .unwrap();
        assert!(config.selector().supports_bip322("xverse"));
        assert!(!config.selector().supports_bip322("wizz"));
        assert_eq!(config.step_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = AuthConfig {
            step_timeout_secs: 0,
            ..AuthConfig::default()
        };
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));
    }

    #[test]
    fn test_validate_caps_timeout() {
        let mut config = AuthConfig {
            step_timeout_secs: u64::MAX,
            ..AuthConfig::default()
        };
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));

        config.step_timeout_secs = MAX_STEP_TIMEOUT_SECS;
        assert!(config.validate().is_ok());
    }
}
