/*
[INPUT]:  Current state, attempt context, command or step settlement
[OUTPUT]: Transition (next state, context patch, events, effect) or none
[POS]:    Machine layer - pure transition logic, no I/O
[UPDATE]: When the state topology or transition guards change
*/

use crate::auth::SignatureTypeSelector;
use crate::http::AuthError;

use super::state::{
    AuthContext, AuthEvent, AuthState, Command, ContextPatch, Effect, Input, NetworkBinding,
    StepOutcome, Transition,
};

/// Compute the transition for `input`, or `None` when the topology defines
/// none (busy machine, failed guard, stale or mismatched settlement).
pub fn reduce(
    state: AuthState,
    ctx: &AuthContext,
    selector: &SignatureTypeSelector,
    input: Input,
) -> Option<Transition> {
    match input {
        Input::Command(command) => reduce_command(state, ctx, selector, command),
        Input::Settled {
            generation,
            outcome,
        } => {
            if generation != ctx.generation || !state.is_busy() {
                return None;
            }
            reduce_settlement(state, ctx, selector, outcome)
        }
    }
}

fn reduce_command(
    state: AuthState,
    ctx: &AuthContext,
    selector: &SignatureTypeSelector,
    command: Command,
) -> Option<Transition> {
    if state.is_busy() {
        return None;
    }

    match command {
        Command::Connect { provider_key } => Some(Transition {
            next: AuthState::Connecting,
            patch: ContextPatch::BeginConnect {
                provider_key: provider_key.clone(),
            },
            events: Vec::new(),
            effect: Some(Effect::Connect { provider_key }),
        }),
        Command::Sign => {
            if !ctx.connected {
                return None;
            }
            let (provider_key, address) = match (&ctx.provider_key, &ctx.address) {
                (Some(provider_key), Some(address)) => (provider_key.clone(), address.clone()),
                _ => return None,
            };
            let scheme = match selector.select(&provider_key, &address) {
                Ok(scheme) => scheme,
                Err(cause) => return Some(fail(cause)),
            };
            Some(Transition {
                next: AuthState::Signing,
                patch: ContextPatch::BeginRefresh { scheme },
                events: Vec::new(),
                effect: Some(Effect::Sign {
                    provider_key,
                    address,
                    challenge: None,
                    scheme,
                }),
            })
        }
    }
}

fn reduce_settlement(
    state: AuthState,
    ctx: &AuthContext,
    selector: &SignatureTypeSelector,
    outcome: StepOutcome,
) -> Option<Transition> {
    match (state, outcome) {
        (_, StepOutcome::Failed(cause)) => Some(fail(cause)),

        (AuthState::Connecting, StepOutcome::Connected { addresses, network }) => {
            let Some(address) = addresses.first().cloned() else {
                return Some(fail(AuthError::UserRejected(
                    "wallet returned no accounts".to_string(),
                )));
            };
            let provider = ctx.provider_key.clone().unwrap_or_default();
            let network = NetworkBinding::bitcoin(network);
            Some(Transition {
                next: AuthState::Preparing,
                patch: ContextPatch::Bind {
                    addresses: addresses.clone(),
                    network: network.clone(),
                },
                events: vec![AuthEvent::Connected {
                    address: address.clone(),
                    addresses,
                    network,
                    provider,
                }],
                effect: Some(Effect::PrepareChallenge { address }),
            })
        }

        (AuthState::Preparing, StepOutcome::ChallengeReady { challenge }) => {
            let (provider_key, address) = bound_account(ctx)?;
            // Decided here, before the wallet is ever asked to sign.
            let scheme = match selector.select(&provider_key, &address) {
                Ok(scheme) => scheme,
                Err(cause) => return Some(fail(cause)),
            };
            Some(Transition {
                next: AuthState::Signing,
                patch: ContextPatch::Challenge {
                    challenge: challenge.clone(),
                    scheme,
                },
                events: vec![AuthEvent::SignDataPrepared {
                    challenge: challenge.clone(),
                }],
                effect: Some(Effect::Sign {
                    provider_key,
                    address,
                    challenge: Some(challenge),
                    scheme,
                }),
            })
        }

        (
            AuthState::Signing,
            StepOutcome::Signed {
                challenge,
                signature,
                public_key_hex,
            },
        ) => {
            let (_, address) = bound_account(ctx)?;
            let scheme = ctx.scheme?;
            let mut events = Vec::with_capacity(2);
            if let Some(challenge) = &challenge {
                events.push(AuthEvent::SignDataPrepared {
                    challenge: challenge.clone(),
                });
            }
            events.push(AuthEvent::SignatureSettled {
                signature: signature.clone(),
                public_key: public_key_hex.clone(),
                scheme,
            });
            Some(Transition {
                next: AuthState::Authenticating,
                patch: ContextPatch::Signature {
                    challenge,
                    signature: signature.clone(),
                    public_key_hex: public_key_hex.clone(),
                },
                events,
                effect: Some(Effect::Authenticate {
                    address,
                    signature,
                    public_key_hex,
                    scheme,
                }),
            })
        }

        (AuthState::Authenticating, StepOutcome::Delegated { identity }) => {
            let (_, address) = bound_account(ctx)?;
            Some(Transition {
                next: AuthState::Authenticating,
                patch: ContextPatch::SessionKey(identity.keypair().public_key_der()),
                events: Vec::new(),
                effect: Some(Effect::Persist { identity, address }),
            })
        }

        (AuthState::Authenticating, StepOutcome::Persisted { identity }) => Some(Transition {
            next: AuthState::Authenticated,
            patch: ContextPatch::Credential(identity.clone()),
            events: vec![AuthEvent::Authenticated { identity }],
            effect: None,
        }),

        _ => None,
    }
}

fn bound_account(ctx: &AuthContext) -> Option<(String, String)> {
    Some((ctx.provider_key.clone()?, ctx.address.clone()?))
}

fn fail(cause: AuthError) -> Transition {
    Transition {
        next: AuthState::Idle,
        patch: ContextPatch::Abandon,
        events: vec![AuthEvent::Error { cause }],
        effect: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        DelegatedIdentity, DelegationChainBuilder, DelegationRecord, RawDelegation,
        SessionKeypair, SignatureScheme,
    };

    const TAPROOT: &str = "bc1pgvdp7lf89d62zadds5jvyjntxmr7v70yv33g7vqaeu2p0cuexveq9hcwdv";
    const LEGACY: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

    struct Harness {
        state: AuthState,
        ctx: AuthContext,
        selector: SignatureTypeSelector,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                state: AuthState::Idle,
                ctx: AuthContext::default(),
                selector: SignatureTypeSelector::default(),
            }
        }

        fn step(&mut self, input: Input) -> Option<Transition> {
            let transition = reduce(self.state, &self.ctx, &self.selector, input)?;
            self.state = transition.next;
            self.ctx.apply(transition.patch.clone());
            Some(transition)
        }

        fn settle(&mut self, outcome: StepOutcome) -> Option<Transition> {
            let generation = self.ctx.generation;
            self.step(Input::Settled {
                generation,
                outcome,
            })
        }

        fn connect(&mut self, provider: &str, address: &str) {
            self.step(Input::Command(Command::connect(provider))).unwrap();
            self.settle(StepOutcome::Connected {
                addresses: vec![address.to_string()],
                network: "livenet".to_string(),
            })
            .unwrap();
        }
    }

    fn identity() -> DelegatedIdentity {
        let keypair = SessionKeypair::generate();
        let record = DelegationRecord {
            delegation: Some(RawDelegation {
                pubkey: Some(hex::encode(keypair.public_key_der())),
                expiration: Some(u64::MAX),
                targets: None,
            }),
            signature: Some("00".to_string()),
        };
        let chain = DelegationChainBuilder::build(&record, b"root").unwrap();
        DelegatedIdentity::new(keypair, chain)
    }

    fn authenticate(harness: &mut Harness, provider: &str, address: &str) -> DelegatedIdentity {
        harness.connect(provider, address);
        harness
            .settle(StepOutcome::ChallengeReady {
                challenge: "challenge".to_string(),
            })
            .unwrap();
        harness
            .settle(StepOutcome::Signed {
                challenge: None,
                signature: "sig".to_string(),
                public_key_hex: "02ab".to_string(),
            })
            .unwrap();
        let identity = identity();
        harness
            .settle(StepOutcome::Delegated {
                identity: identity.clone(),
            })
            .unwrap();
        harness
            .settle(StepOutcome::Persisted {
                identity: identity.clone(),
            })
            .unwrap();
        identity
    }

    #[test]
    fn test_happy_path_sequence() {
        let mut harness = Harness::new();

        let t = harness
            .step(Input::Command(Command::connect("wizz")))
            .unwrap();
        assert_eq!(t.next, AuthState::Connecting);
        assert!(matches!(t.effect, Some(Effect::Connect { .. })));

        let t = harness
            .settle(StepOutcome::Connected {
                addresses: vec![TAPROOT.to_string(), LEGACY.to_string()],
                network: "livenet".to_string(),
            })
            .unwrap();
        assert_eq!(t.next, AuthState::Preparing);
        match &t.events[..] {
            [AuthEvent::Connected { address, addresses, provider, .. }] => {
                assert_eq!(address, TAPROOT);
                assert_eq!(addresses.len(), 2);
                assert_eq!(provider, "wizz");
            }
            other => panic!("unexpected events: {other:?}"),
        }

        let t = harness
            .settle(StepOutcome::ChallengeReady {
                challenge: "challenge".to_string(),
            })
            .unwrap();
        assert_eq!(t.next, AuthState::Signing);
        match t.effect {
            Some(Effect::Sign { scheme, challenge, .. }) => {
                assert_eq!(scheme, SignatureScheme::Bip322Simple);
                assert_eq!(challenge.as_deref(), Some("challenge"));
            }
            other => panic!("unexpected effect: {other:?}"),
        }

        let t = harness
            .settle(StepOutcome::Signed {
                challenge: None,
                signature: "sig".to_string(),
                public_key_hex: "02ab".to_string(),
            })
            .unwrap();
        assert_eq!(t.next, AuthState::Authenticating);
        assert!(matches!(
            t.events[..],
            [AuthEvent::SignatureSettled { scheme: SignatureScheme::Bip322Simple, .. }]
        ));

        let identity = identity();
        let t = harness
            .settle(StepOutcome::Delegated {
                identity: identity.clone(),
            })
            .unwrap();
        assert_eq!(t.next, AuthState::Authenticating);
        assert!(matches!(t.effect, Some(Effect::Persist { .. })));
        assert!(harness.ctx.identity.is_none());

        let t = harness
            .settle(StepOutcome::Persisted {
                identity: identity.clone(),
            })
            .unwrap();
        assert_eq!(t.next, AuthState::Authenticated);
        assert!(t.effect.is_none());
        assert_eq!(harness.ctx.identity.as_ref(), Some(&identity));
    }

    #[test]
    fn test_legacy_address_uses_ecdsa_even_when_allow_listed() {
        let mut harness = Harness::new();
        harness.connect("wizz", LEGACY);
        let t = harness
            .settle(StepOutcome::ChallengeReady {
                challenge: "challenge".to_string(),
            })
            .unwrap();
        assert!(matches!(
            t.effect,
            Some(Effect::Sign { scheme: SignatureScheme::Ecdsa, .. })
        ));
    }

    #[test]
    fn test_failure_in_every_busy_state_returns_to_idle() {
        for busy_steps in 0..4 {
            let mut harness = Harness::new();
            harness
                .step(Input::Command(Command::connect("wizz")))
                .unwrap();
            let outcomes = [
                StepOutcome::Connected {
                    addresses: vec![TAPROOT.to_string()],
                    network: "livenet".to_string(),
                },
                StepOutcome::ChallengeReady {
                    challenge: "c".to_string(),
                },
                StepOutcome::Signed {
                    challenge: None,
                    signature: "s".to_string(),
                    public_key_hex: "02".to_string(),
                },
            ];
            for outcome in outcomes.into_iter().take(busy_steps.min(3)) {
                harness.settle(outcome).unwrap();
            }
            assert!(harness.state.is_busy());

            let t = harness
                .settle(StepOutcome::Failed(AuthError::rejected("login", "nope")))
                .unwrap();
            assert_eq!(t.next, AuthState::Idle);
            assert!(matches!(t.events[..], [AuthEvent::Error { .. }]));
            assert!(!harness.ctx.connected);
            assert!(harness.ctx.signature.is_none());
        }
    }

    #[test]
    fn test_empty_account_list_is_rejection() {
        let mut harness = Harness::new();
        harness
            .step(Input::Command(Command::connect("unisat")))
            .unwrap();
        let t = harness
            .settle(StepOutcome::Connected {
                addresses: Vec::new(),
                network: "livenet".to_string(),
            })
            .unwrap();
        assert_eq!(t.next, AuthState::Idle);
        assert!(matches!(
            &t.events[..],
            [AuthEvent::Error { cause: AuthError::UserRejected(_) }]
        ));
    }

    #[test]
    fn test_unrecognized_address_fails_before_signing() {
        let mut harness = Harness::new();
        harness.connect("wizz", "0xdeadbeef");
        let t = harness
            .settle(StepOutcome::ChallengeReady {
                challenge: "c".to_string(),
            })
            .unwrap();
        assert_eq!(t.next, AuthState::Idle);
        assert!(t.effect.is_none());
        assert!(matches!(
            &t.events[..],
            [AuthEvent::Error { cause: AuthError::UnrecognizedAddress(_) }]
        ));
    }

    #[test]
    fn test_sign_guard_requires_connection() {
        let mut harness = Harness::new();
        assert!(harness.step(Input::Command(Command::Sign)).is_none());
        assert_eq!(harness.state, AuthState::Idle);
    }

    #[test]
    fn test_sign_from_authenticated_refreshes() {
        let mut harness = Harness::new();
        let first = authenticate(&mut harness, "wizz", TAPROOT);

        let t = harness.step(Input::Command(Command::Sign)).unwrap();
        assert_eq!(t.next, AuthState::Signing);
        assert!(matches!(t.effect, Some(Effect::Sign { challenge: None, .. })));

        // A failed refresh keeps the previous identity and binding.
        harness
            .settle(StepOutcome::Failed(AuthError::UserRejected("closed".to_string())))
            .unwrap();
        assert_eq!(harness.state, AuthState::Idle);
        assert!(harness.ctx.connected);
        assert_eq!(harness.ctx.identity.as_ref(), Some(&first));

        assert!(harness.step(Input::Command(Command::Sign)).is_some());
    }

    #[test]
    fn test_refresh_emits_fresh_challenge() {
        let mut harness = Harness::new();
        authenticate(&mut harness, "wizz", TAPROOT);
        harness.step(Input::Command(Command::Sign)).unwrap();

        let t = harness
            .settle(StepOutcome::Signed {
                challenge: Some("fresh".to_string()),
                signature: "sig2".to_string(),
                public_key_hex: "02ab".to_string(),
            })
            .unwrap();
        assert!(matches!(
            &t.events[..],
            [AuthEvent::SignDataPrepared { .. }, AuthEvent::SignatureSettled { .. }]
        ));
        assert_eq!(harness.ctx.challenge.as_deref(), Some("fresh"));
    }

    #[test]
    fn test_connect_from_authenticated_discards_identity() {
        let mut harness = Harness::new();
        authenticate(&mut harness, "wizz", TAPROOT);

        let t = harness
            .step(Input::Command(Command::connect("unisat")))
            .unwrap();
        assert_eq!(t.next, AuthState::Connecting);
        assert!(harness.ctx.identity.is_none());
        assert_eq!(harness.ctx.provider_key.as_deref(), Some("unisat"));
    }

    #[test]
    fn test_commands_ignored_while_busy() {
        let mut harness = Harness::new();
        harness
            .step(Input::Command(Command::connect("wizz")))
            .unwrap();
        assert!(harness
            .step(Input::Command(Command::connect("unisat")))
            .is_none());
        assert!(harness.step(Input::Command(Command::Sign)).is_none());
        assert_eq!(harness.ctx.provider_key.as_deref(), Some("wizz"));
    }

    #[test]
    fn test_stale_settlement_is_discarded() {
        let mut harness = Harness::new();
        harness
            .step(Input::Command(Command::connect("wizz")))
            .unwrap();
        let stale_generation = harness.ctx.generation;
        harness
            .settle(StepOutcome::Failed(AuthError::Timeout {
                step: "connect".to_string(),
                millis: 10,
            }))
            .unwrap();
        harness
            .step(Input::Command(Command::connect("unisat")))
            .unwrap();

        let late = harness.step(Input::Settled {
            generation: stale_generation,
            outcome: StepOutcome::Connected {
                addresses: vec![LEGACY.to_string()],
                network: "livenet".to_string(),
            },
        });
        assert!(late.is_none());
        assert_eq!(harness.state, AuthState::Connecting);
        assert!(harness.ctx.address.is_none());
    }

    #[test]
    fn test_mismatched_outcome_is_ignored() {
        let mut harness = Harness::new();
        harness
            .step(Input::Command(Command::connect("wizz")))
            .unwrap();
        assert!(harness
            .settle(StepOutcome::ChallengeReady {
                challenge: "c".to_string(),
            })
            .is_none());
        assert_eq!(harness.state, AuthState::Connecting);
    }
}
