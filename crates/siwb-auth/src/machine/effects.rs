/*
[INPUT]:  Effects requested by the reducer
[OUTPUT]: Step outcomes from wallet, authority and store calls
[POS]:    Machine layer - performs the outbound I/O of each step
[UPDATE]: When a step gains or changes an outbound call
*/

use std::sync::Arc;

use tracing::debug;

use crate::auth::{
    DelegatedIdentity, DelegationChainBuilder, ProviderRegistry, SessionCredentialStore,
    SessionKeypair, SignatureScheme, VisibilityGuard, WalletEvent,
};
use crate::http::{AuthError, AuthorityClient, LoginRequest, Result};

use super::state::{Effect, StepOutcome};

/// Everything a step may call out to
#[derive(Clone)]
pub struct EffectRunner {
    registry: Arc<ProviderRegistry>,
    authority: Arc<dyn AuthorityClient>,
    store: Arc<dyn SessionCredentialStore>,
    visibility: VisibilityGuard,
}

impl EffectRunner {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        authority: Arc<dyn AuthorityClient>,
        store: Arc<dyn SessionCredentialStore>,
        visibility: VisibilityGuard,
    ) -> Self {
        Self {
            registry,
            authority,
            store,
            visibility,
        }
    }

    pub fn with_visibility(mut self, visibility: VisibilityGuard) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn visibility(&self) -> &VisibilityGuard {
        &self.visibility
    }

    /// Run one effect to completion; errors become `StepOutcome::Failed`
    pub async fn run(&self, effect: Effect) -> StepOutcome {
        let step = effect.step();
        let result = match effect {
            Effect::Connect { provider_key } => self.connect(&provider_key).await,
            Effect::PrepareChallenge { address } => self
                .authority
                .prepare_login(&address)
                .await
                .map(|challenge| StepOutcome::ChallengeReady { challenge }),
            Effect::Sign {
                provider_key,
                address,
                challenge,
                scheme,
            } => self.sign(&provider_key, &address, challenge, scheme).await,
            Effect::Authenticate {
                address,
                signature,
                public_key_hex,
                scheme,
            } => {
                self.authenticate(address, signature, public_key_hex, scheme)
                    .await
            }
            Effect::Persist { identity, address } => self
                .store
                .save(identity.keypair(), identity.chain(), &address)
                .await
                .map(|()| StepOutcome::Persisted { identity }),
        };

        result.unwrap_or_else(|err| {
            debug!(step, error = %err, "step failed");
            StepOutcome::Failed(err)
        })
    }

    async fn connect(&self, provider_key: &str) -> Result<StepOutcome> {
        let wallet = self.registry.get(provider_key)?;
        // Held only for the duration of the connect step.
        let mut subscription = wallet.subscribe();

        let mut addresses = wallet.request_accounts().await?;
        let mut network = wallet.get_network().await?;

        if let Some(receiver) = subscription.as_mut() {
            for event in self.visibility.drain(receiver) {
                match event {
                    WalletEvent::AccountsChanged(accounts) => addresses = accounts,
                    WalletEvent::NetworkChanged(token) => network = token,
                }
            }
        }

        debug!(provider_key, accounts = addresses.len(), %network, "wallet connected");
        Ok(StepOutcome::Connected { addresses, network })
    }

    async fn sign(
        &self,
        provider_key: &str,
        address: &str,
        challenge: Option<String>,
        scheme: SignatureScheme,
    ) -> Result<StepOutcome> {
        let wallet = self.registry.get(provider_key)?;

        // Challenges are single-use, a refresh asks for a new one.
        let (message, fresh) = match challenge {
            Some(challenge) => (challenge, false),
            None => (self.authority.prepare_login(address).await?, true),
        };

        let signature = wallet.sign_message(&message, scheme).await?;
        let public_key_hex = wallet.get_public_key().await?;

        Ok(StepOutcome::Signed {
            challenge: fresh.then_some(message),
            signature,
            public_key_hex,
        })
    }

    async fn authenticate(
        &self,
        address: String,
        signature: String,
        public_key_hex: String,
        scheme: SignatureScheme,
    ) -> Result<StepOutcome> {
        let keypair = SessionKeypair::generate();
        let session_public_key = keypair.public_key_der();

        let details = self
            .authority
            .login(&LoginRequest {
                signature,
                address: address.clone(),
                public_key_hex,
                session_public_key: session_public_key.clone(),
                scheme,
            })
            .await?;

        let record = self
            .authority
            .get_delegation(&address, &session_public_key, details.expiration)
            .await?;
        let chain = DelegationChainBuilder::build(&record, &details.root_public_key)?;

        if chain.session_public_key() != Some(session_public_key.as_slice()) {
            return Err(AuthError::MalformedDelegation(
                "delegation issued to a different session key".to_string(),
            ));
        }

        Ok(StepOutcome::Delegated {
            identity: DelegatedIdentity::new(keypair, chain),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{MemoryCredentialStore, MockWallet};
    use crate::http::MockAuthority;

    const ADDRESS: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

    fn runner(wallet: MockWallet) -> (EffectRunner, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        let registry = ProviderRegistry::new().with("wizz", Arc::new(wallet));
        let runner = EffectRunner::new(
            Arc::new(registry),
            Arc::new(MockAuthority::new("Sign in", b"root-key", u64::MAX)),
            store.clone(),
            VisibilityGuard::new(),
        );
        (runner, store)
    }

    #[tokio::test]
    async fn test_connect_applies_visible_account_change() {
        let wallet = MockWallet::new(ADDRESS, "sig", "02ab").emitting_on_connect(
            WalletEvent::AccountsChanged(vec!["bc1psecond".to_string()]),
        );
        let (runner, _) = runner(wallet);

        match runner
            .run(Effect::Connect {
                provider_key: "wizz".to_string(),
            })
            .await
        {
            StepOutcome::Connected { addresses, network } => {
                assert_eq!(addresses, vec!["bc1psecond"]);
                assert_eq!(network, "livenet");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_ignores_change_while_hidden() {
        let wallet = MockWallet::new(ADDRESS, "sig", "02ab")
            .emitting_on_connect(WalletEvent::NetworkChanged("testnet".to_string()));
        let (runner, _) = runner(wallet);
        runner.visibility().set_visible(false);

        match runner
            .run(Effect::Connect {
                provider_key: "wizz".to_string(),
            })
            .await
        {
            StepOutcome::Connected { network, .. } => assert_eq!(network, "livenet"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_provider_fails() {
        let (runner, _) = runner(MockWallet::new(ADDRESS, "sig", "02ab"));
        let outcome = runner
            .run(Effect::Connect {
                provider_key: "leather".to_string(),
            })
            .await;
        assert!(matches!(
            outcome,
            StepOutcome::Failed(AuthError::ProviderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_without_challenge_prepares_one() {
        let wallet = MockWallet::new(ADDRESS, "sig", "02ab");
        let (runner, _) = runner(wallet.clone());

        let outcome = runner
            .run(Effect::Sign {
                provider_key: "wizz".to_string(),
                address: ADDRESS.to_string(),
                challenge: None,
                scheme: SignatureScheme::Ecdsa,
            })
            .await;
        let expected = format!("Sign in {ADDRESS}");
        match outcome {
            StepOutcome::Signed { challenge, .. } => {
                assert_eq!(challenge.as_deref(), Some(expected.as_str()));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(wallet.sign_calls(), vec![(expected, SignatureScheme::Ecdsa)]);
    }

    #[tokio::test]
    async fn test_authenticate_then_persist() {
        let (runner, store) = runner(MockWallet::new(ADDRESS, "sig", "02ab"));

        let identity = match runner
            .run(Effect::Authenticate {
                address: ADDRESS.to_string(),
                signature: "sig".to_string(),
                public_key_hex: "02ab".to_string(),
                scheme: SignatureScheme::Ecdsa,
            })
            .await
        {
            StepOutcome::Delegated { identity } => identity,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(
            identity.chain().session_public_key(),
            Some(identity.keypair().public_key_der().as_slice())
        );
        assert!(store.is_empty());

        let outcome = runner
            .run(Effect::Persist {
                identity: identity.clone(),
                address: ADDRESS.to_string(),
            })
            .await;
        assert!(matches!(outcome, StepOutcome::Persisted { .. }));
        assert_eq!(store.write_count(), 1);
        let saved = store.load().await.unwrap().unwrap();
        assert_eq!(saved.identity, identity);
    }
}
