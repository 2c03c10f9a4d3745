/*
[INPUT]:  Failure sources (wallet, authority, delegation, storage, transport)
[OUTPUT]: Attempt-scoped error taxonomy with retry hints
[POS]:    Error handling layer - unified error type for the whole crate
[UPDATE]: When adding new failure sources or changing error messages
*/

use reqwest::StatusCode;
use thiserror::Error;

/// Main error type for sign-in attempts
///
/// Every variant is attempt-scoped: the state machine reports it as an
/// `Error` event and returns to idle. The type is `Clone` so it can travel
/// inside broadcast events.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No wallet adapter is registered under the requested key
    #[error("wallet provider not found: {0}")]
    ProviderNotFound(String),

    /// The wallet declined to connect or to sign
    #[error("user rejected the wallet request: {0}")]
    UserRejected(String),

    /// Address does not match any known prefix
    #[error("unrecognized address: {0}")]
    UnrecognizedAddress(String),

    /// Wallet cannot produce the requested signature type for this address
    #[error("wallet does not support {scheme} signatures for {address}")]
    UnsupportedSchemeForAddress { scheme: String, address: String },

    /// One of the authority calls returned an error variant
    #[error("authority rejected {call}: {reason}")]
    AuthorityRejected { call: String, reason: String },

    /// Delegation response is missing required fields
    #[error("malformed delegation: {0}")]
    MalformedDelegation(String),

    /// Session credential store could not be read or written
    #[error("credential store unavailable: {0}")]
    StoreUnavailable(String),

    /// A wallet or authority step did not settle in time
    #[error("{step} step timed out after {millis}ms")]
    Timeout { step: String, millis: u64 },

    /// HTTP request to the authority failed
    #[error("transport error: {0}")]
    Transport(String),

    /// Authority answered with a body that could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Command has no transition from the current state
    #[error("{command} ignored in state {state}")]
    CommandIgnored { command: String, state: String },

    /// The machine task has stopped
    #[error("auth machine stopped")]
    MachineStopped,
}

impl AuthError {
    /// Check if the error is worth re-issuing the same command for
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::Transport(_) | AuthError::Timeout { .. } | AuthError::InvalidResponse(_)
        )
    }

    /// Check if the wallet owner declined the request
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, AuthError::UserRejected(_))
    }

    /// Create an authority rejection for the named remote call
    pub fn rejected(call: &str, reason: impl Into<String>) -> Self {
        AuthError::AuthorityRejected {
            call: call.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a transport error from a non-success HTTP status
    pub fn http_status(status: StatusCode, body: impl Into<String>) -> Self {
        AuthError::Transport(format!("HTTP {}: {}", status.as_u16(), body.into()))
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            AuthError::InvalidResponse(err.to_string())
        } else {
            AuthError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::InvalidResponse(err.to_string())
    }
}

impl From<url::ParseError> for AuthError {
    fn from(err: url::ParseError) -> Self {
        AuthError::Config(format!("invalid URL: {err}"))
    }
}

/// Result type alias for sign-in operations
pub type Result<T> = std::result::Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let timeout_err = AuthError::Timeout {
            step: "signing".to_string(),
            millis: 30_000,
        };
        assert!(timeout_err.is_retryable());

        let rejected = AuthError::UserRejected("closed popup".to_string());
        assert!(!rejected.is_retryable());
        assert!(rejected.is_user_rejection());
    }

    #[test]
    fn test_authority_rejection_message() {
        let err = AuthError::rejected("login", "signature mismatch");
        assert_eq!(
            err.to_string(),
            "authority rejected login: signature mismatch"
        );
    }

    #[test]
    fn test_http_status_error() {
        let err = AuthError::http_status(StatusCode::BAD_GATEWAY, "upstream down");
        match err {
            AuthError::Transport(message) => {
                assert!(message.contains("502"));
                assert!(message.contains("upstream down"));
            }
            _ => panic!("Expected Transport error variant"),
        }
    }
}
