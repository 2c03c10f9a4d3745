/*
[INPUT]:  Provider keys and wallet adapter instances
[OUTPUT]: Adapter lookup by provider key
[POS]:    Auth layer - explicit injection of wallet adapters
[UPDATE]: When adapter registration rules change
*/

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::auth::WalletCapability;
use crate::http::{AuthError, Result};

/// Maps provider keys ("wizz", "unisat", ...) to wallet adapters
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: BTreeMap<String, Arc<dyn WalletCapability>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one under the same key
    pub fn register(
        &mut self,
        provider_key: impl Into<String>,
        adapter: Arc<dyn WalletCapability>,
    ) -> &mut Self {
        self.adapters.insert(provider_key.into(), adapter);
        self
    }

    pub fn with(mut self, provider_key: impl Into<String>, adapter: Arc<dyn WalletCapability>) -> Self {
        self.register(provider_key, adapter);
        self
    }

    /// Look up the adapter for `provider_key`
    pub fn get(&self, provider_key: &str) -> Result<Arc<dyn WalletCapability>> {
        self.adapters
            .get(provider_key)
            .cloned()
            .ok_or_else(|| AuthError::ProviderNotFound(provider_key.to_string()))
    }

    pub fn provider_keys(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.provider_keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MockWallet;

    #[test]
    fn test_lookup_registered_provider() {
        let registry = ProviderRegistry::new().with(
            "wizz",
            Arc::new(MockWallet::new("bc1qexample", "sig", "02ab")),
        );
        assert!(registry.get("wizz").is_ok());
        assert_eq!(registry.provider_keys(), vec!["wizz".to_string()]);
    }

    #[test]
    fn test_missing_provider() {
        let registry = ProviderRegistry::new();
        match registry.get("xverse") {
            Err(AuthError::ProviderNotFound(key)) => assert_eq!(key, "xverse"),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected ProviderNotFound"),
        }
    }
}
