/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public sign-in-with-Bitcoin crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod address;
pub mod auth;
pub mod config;
pub mod http;
pub mod machine;

pub use address::{AddressFormat, AddressInfo, BitcoinNetwork, classify};

// Re-export commonly used types from auth
pub use auth::{
    DelegatedIdentity,
    DelegationChain,
    FileCredentialStore,
    MemoryCredentialStore,
    MockWallet,
    Principal,
    ProviderRegistry,
    SessionCredentialStore,
    SessionKeypair,
    SignatureScheme,
    SignatureTypeSelector,
    VisibilityGuard,
    WalletCapability,
    WalletEvent,
    WalletNotification,
};

pub use config::AuthConfig;

// Re-export commonly used types from http
pub use http::{
    AuthError,
    AuthorityClient,
    AuthorityHttpClient,
    ClientConfig,
    HttpAuthorityClient,
    MockAuthority,
    Result,
};

// Re-export the state machine surface
pub use machine::{AuthEvent, AuthHandle, AuthMachine, AuthState, Command};
