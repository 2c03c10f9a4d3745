/*
[INPUT]:  Commands, step settlements and context patches
[OUTPUT]: States, events, effects and the attempt context
[POS]:    Machine layer - data model of the sign-in state machine
[UPDATE]: When states, events or context fields change
*/

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::auth::{DelegatedIdentity, SignatureScheme};
use crate::http::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Idle,
    Connecting,
    Preparing,
    Signing,
    Authenticating,
    Authenticated,
}

impl AuthState {
    /// True while a step of an attempt is in progress
    pub fn is_busy(&self) -> bool {
        !matches!(self, AuthState::Idle | AuthState::Authenticated)
    }
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthState::Idle => "idle",
            AuthState::Connecting => "connecting",
            AuthState::Preparing => "preparing",
            AuthState::Signing => "signing",
            AuthState::Authenticating => "authenticating",
            AuthState::Authenticated => "authenticated",
        };
        f.write_str(name)
    }
}

/// User-issued commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect { provider_key: String },
    /// Sign again with the already bound account, refreshing the delegation
    Sign,
}

impl Command {
    pub fn connect(provider_key: impl Into<String>) -> Self {
        Command::Connect {
            provider_key: provider_key.into(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Connect { .. } => "connect",
            Command::Sign => "sign",
        }
    }
}

/// Network a wallet is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkBinding {
    pub family: String,
    pub chain_id: String,
}

impl NetworkBinding {
    pub fn bitcoin(chain_id: impl Into<String>) -> Self {
        Self {
            family: "bitcoin".to_string(),
            chain_id: chain_id.into(),
        }
    }
}

/// Events observable by callers, in order per attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    Connected {
        address: String,
        addresses: Vec<String>,
        network: NetworkBinding,
        provider: String,
    },
    SignDataPrepared {
        challenge: String,
    },
    SignatureSettled {
        signature: String,
        public_key: String,
        scheme: SignatureScheme,
    },
    Authenticated {
        identity: DelegatedIdentity,
    },
    Error {
        cause: AuthError,
    },
}

/// Outbound call the driver performs on behalf of the current state
#[derive(Debug, Clone)]
pub enum Effect {
    Connect {
        provider_key: String,
    },
    PrepareChallenge {
        address: String,
    },
    /// Without a challenge, a fresh one is prepared before signing
    Sign {
        provider_key: String,
        address: String,
        challenge: Option<String>,
        scheme: SignatureScheme,
    },
    Authenticate {
        address: String,
        signature: String,
        public_key_hex: String,
        scheme: SignatureScheme,
    },
    Persist {
        identity: DelegatedIdentity,
        address: String,
    },
}

impl Effect {
    /// Name of the step for logs and timeout errors
    pub fn step(&self) -> &'static str {
        match self {
            Effect::Connect { .. } => "connect",
            Effect::PrepareChallenge { .. } => "prepare",
            Effect::Sign { .. } => "sign",
            Effect::Authenticate { .. } => "authenticate",
            Effect::Persist { .. } => "persist",
        }
    }

    /// Wallet and authority calls are bounded by the step timeout; the
    /// final store write is not.
    pub fn is_timed(&self) -> bool {
        !matches!(self, Effect::Persist { .. })
    }
}

/// Result of an effect, fed back into the reducer
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Connected {
        addresses: Vec<String>,
        network: String,
    },
    ChallengeReady {
        challenge: String,
    },
    Signed {
        /// Present when the sign step had to prepare its own challenge
        challenge: Option<String>,
        signature: String,
        public_key_hex: String,
    },
    Delegated {
        identity: DelegatedIdentity,
    },
    Persisted {
        identity: DelegatedIdentity,
    },
    Failed(AuthError),
}

/// Reducer input
#[derive(Debug, Clone)]
pub enum Input {
    Command(Command),
    Settled { generation: u64, outcome: StepOutcome },
}

/// Change applied to the context by a transition
#[derive(Debug, Clone)]
pub enum ContextPatch {
    Keep,
    /// Start a fresh attempt, discarding everything including the identity
    BeginConnect { provider_key: String },
    /// Start a refresh with the bound account
    BeginRefresh { scheme: SignatureScheme },
    Bind {
        addresses: Vec<String>,
        network: NetworkBinding,
    },
    Challenge {
        challenge: String,
        scheme: SignatureScheme,
    },
    Signature {
        challenge: Option<String>,
        signature: String,
        public_key_hex: String,
    },
    SessionKey(Vec<u8>),
    Credential(DelegatedIdentity),
    /// Drop attempt-scoped fields after a failure
    Abandon,
}

/// Everything a transition does: next state, context change, events, effect
#[derive(Debug, Clone)]
pub struct Transition {
    pub next: AuthState,
    pub patch: ContextPatch,
    pub events: Vec<AuthEvent>,
    pub effect: Option<Effect>,
}

/// Attempt context, mutated only by the machine
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    /// Tag of the current attempt; settlements carrying another tag are stale
    pub generation: u64,
    pub provider_key: Option<String>,
    pub address: Option<String>,
    pub addresses: Vec<String>,
    pub network: Option<NetworkBinding>,
    pub connected: bool,
    pub refreshing: bool,
    pub challenge: Option<String>,
    pub signature: Option<String>,
    pub public_key_hex: Option<String>,
    pub scheme: Option<SignatureScheme>,
    pub session_public_key: Option<Vec<u8>>,
    pub identity: Option<DelegatedIdentity>,
}

impl AuthContext {
    pub fn apply(&mut self, patch: ContextPatch) {
        match patch {
            ContextPatch::Keep => {}
            ContextPatch::BeginConnect { provider_key } => {
                *self = AuthContext {
                    generation: self.generation + 1,
                    provider_key: Some(provider_key),
                    ..AuthContext::default()
                };
            }
            ContextPatch::BeginRefresh { scheme } => {
                self.generation += 1;
                self.refreshing = true;
                self.clear_attempt_fields();
                self.scheme = Some(scheme);
            }
            ContextPatch::Bind { addresses, network } => {
                self.address = addresses.first().cloned();
                self.addresses = addresses;
                self.network = Some(network);
                self.connected = true;
            }
            ContextPatch::Challenge { challenge, scheme } => {
                self.challenge = Some(challenge);
                self.scheme = Some(scheme);
            }
            ContextPatch::Signature {
                challenge,
                signature,
                public_key_hex,
            } => {
                if challenge.is_some() {
                    self.challenge = challenge;
                }
                self.signature = Some(signature);
                self.public_key_hex = Some(public_key_hex);
            }
            ContextPatch::SessionKey(key) => {
                self.session_public_key = Some(key);
            }
            ContextPatch::Credential(identity) => {
                self.identity = Some(identity);
                self.refreshing = false;
            }
            ContextPatch::Abandon => {
                let generation = self.generation + 1;
                if self.refreshing {
                    self.clear_attempt_fields();
                    self.refreshing = false;
                    self.generation = generation;
                } else {
                    *self = AuthContext {
                        generation,
                        ..AuthContext::default()
                    };
                }
            }
        }
    }

    fn clear_attempt_fields(&mut self) {
        self.challenge = None;
        self.signature = None;
        self.public_key_hex = None;
        self.scheme = None;
        self.session_public_key = None;
    }
}
