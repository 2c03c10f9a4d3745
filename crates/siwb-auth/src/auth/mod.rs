/*
[INPUT]:  Wallet adapters, session keys and authority delegation records
[OUTPUT]: Signature scheme choice, delegated identities, stored sessions
[POS]:    Auth layer - wallet abstraction, session keys and persistence
[UPDATE]: When wallet operations, delegation shape or storage change
*/

pub mod delegation;
pub mod principal;
pub mod registry;
pub mod scheme;
pub mod signer;
pub mod store;
pub mod visibility;
pub mod wallet;

pub use delegation::{
    DelegatedIdentity, Delegation, DelegationChain, DelegationChainBuilder, DelegationRecord,
    RawDelegation, SignedDelegation,
};
pub use principal::Principal;
pub use registry::ProviderRegistry;
pub use scheme::{DEFAULT_BIP322_PROVIDERS, SignatureScheme, SignatureTypeSelector};
pub use signer::SessionKeypair;
pub use store::{
    FileCredentialStore, MemoryCredentialStore, SessionCredentialStore, StoredSession,
    restore_session,
};
pub use visibility::VisibilityGuard;
pub use wallet::{
    MockFailure, MockWallet, WalletCapability, WalletEvent, WalletNotification,
};
