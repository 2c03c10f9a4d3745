/*
[INPUT]:  Authority base URL and request payloads
[OUTPUT]: Challenge, login details and delegation records
[POS]:    HTTP layer - delegation authority communication
[UPDATE]: When adding authority calls or changing client behavior
*/

pub mod authority;
pub mod client;
pub mod error;

pub use error::{AuthError, Result};

pub use authority::{
    AuthorityClient, AuthorityStep, HttpAuthorityClient, LoginDetails, LoginRequest,
    MockAuthority,
};
pub use client::{AuthorityHttpClient, ClientConfig};
