/*
[INPUT]:  Address, wallet signature, session public key
[OUTPUT]: Challenge text, login details, signed delegation record
[POS]:    HTTP layer - remote delegation authority calls
[UPDATE]: When authority endpoints or their payloads change
*/

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::{DelegationRecord, Principal, RawDelegation, SignatureScheme};
use crate::http::{AuthError, AuthorityHttpClient, Result};

/// Everything the authority needs to verify a signed challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub signature: String,
    pub address: String,
    pub public_key_hex: String,
    /// DER-encoded session public key the delegation will be issued to
    pub session_public_key: Vec<u8>,
    pub scheme: SignatureScheme,
}

/// Acknowledgement of a verified login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginDetails {
    /// DER-encoded root public key, the principal is derived from it
    pub root_public_key: Vec<u8>,
    /// Delegation expiration in nanoseconds since the UNIX epoch
    pub expiration: u64,
}

/// Remote authority that turns a signed challenge into a delegation
#[async_trait]
pub trait AuthorityClient: Send + Sync {
    /// Ask for a fresh challenge bound to `address`
    async fn prepare_login(&self, address: &str) -> Result<String>;

    /// Submit the wallet signature over the challenge
    async fn login(&self, request: &LoginRequest) -> Result<LoginDetails>;

    /// Fetch the delegation issued to `session_public_key`
    async fn get_delegation(
        &self,
        address: &str,
        session_public_key: &[u8],
        expiration: u64,
    ) -> Result<DelegationRecord>;

    /// Principal previously bound to `address`
    async fn get_principal(&self, _address: &str) -> Result<Principal> {
        Err(AuthError::rejected("get_principal", "unsupported by this authority"))
    }
}

/// `{"Ok": value}` or `{"Err": reason}` as answered by the authority
#[derive(Debug, Deserialize)]
enum Envelope<T> {
    Ok(T),
    Err(String),
}

impl<T> Envelope<T> {
    fn into_result(self, call: &str) -> Result<T> {
        match self {
            Envelope::Ok(value) => Ok(value),
            Envelope::Err(reason) => Err(AuthError::rejected(call, reason)),
        }
    }
}

#[derive(Debug, Serialize)]
struct AddressBody<'a> {
    address: &'a str,
}

#[derive(Debug, Serialize)]
struct LoginBody<'a> {
    signature: &'a str,
    address: &'a str,
    public_key: &'a str,
    session_key: String,
    sign_message_type: SignatureScheme,
}

#[derive(Debug, Deserialize)]
struct LoginBodyOk {
    expiration: u64,
    user_canister_pubkey: String,
}

#[derive(Debug, Serialize)]
struct DelegationBody<'a> {
    address: &'a str,
    session_key: String,
    expiration: u64,
}

/// JSON-over-HTTP binding of the authority calls
#[derive(Debug, Clone)]
pub struct HttpAuthorityClient {
    client: AuthorityHttpClient,
}

impl HttpAuthorityClient {
    pub fn new(client: AuthorityHttpClient) -> Self {
        Self { client }
    }

    async fn call<B: Serialize, T: DeserializeOwned>(&self, call: &str, body: &B) -> Result<T> {
        debug!(call, "authority request");
        let builder = self
            .client
            .request(Method::POST, &format!("/siwb/{call}"))?
            .json(body);
        let envelope: Envelope<T> = self.client.send_json(builder).await?;
        envelope.into_result(call)
    }
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value.strip_prefix("0x").unwrap_or(value))
        .map_err(|e| AuthError::InvalidResponse(format!("{field} is not hex: {e}")))
}

#[async_trait]
impl AuthorityClient for HttpAuthorityClient {
    /// POST {base}/siwb/prepare_login
    async fn prepare_login(&self, address: &str) -> Result<String> {
        self.call("prepare_login", &AddressBody { address }).await
    }

    /// POST {base}/siwb/login
    async fn login(&self, request: &LoginRequest) -> Result<LoginDetails> {
        let body = LoginBody {
            signature: &request.signature,
            address: &request.address,
            public_key: &request.public_key_hex,
            session_key: hex::encode(&request.session_public_key),
            sign_message_type: request.scheme,
        };
        let ok: LoginBodyOk = self.call("login", &body).await?;
        Ok(LoginDetails {
            root_public_key: decode_hex("user_canister_pubkey", &ok.user_canister_pubkey)?,
            expiration: ok.expiration,
        })
    }

    /// POST {base}/siwb/get_delegation
    async fn get_delegation(
        &self,
        address: &str,
        session_public_key: &[u8],
        expiration: u64,
    ) -> Result<DelegationRecord> {
        let body = DelegationBody {
            address,
            session_key: hex::encode(session_public_key),
            expiration,
        };
        self.call("get_delegation", &body).await
    }

    /// POST {base}/siwb/get_principal
    async fn get_principal(&self, address: &str) -> Result<Principal> {
        let principal: String = self.call("get_principal", &AddressBody { address }).await?;
        Principal::from_slice(&decode_hex("principal", &principal)?)
    }
}

/// Authority call a [`MockAuthority`] should reject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityStep {
    PrepareLogin,
    Login,
    GetDelegation,
}

/// Scripted authority for tests and demos.
///
/// Issues delegations to whatever session key it is asked about, so chains
/// built from its answers are well-formed.
#[derive(Debug, Clone)]
pub struct MockAuthority {
    challenge: String,
    root_public_key: Vec<u8>,
    expiration: u64,
    reject: Option<AuthorityStep>,
    omit_delegation_signature: bool,
    logins: Arc<Mutex<Vec<LoginRequest>>>,
}

impl MockAuthority {
    pub fn new(challenge: &str, root_public_key: &[u8], expiration: u64) -> Self {
        Self {
            challenge: challenge.to_string(),
            root_public_key: root_public_key.to_vec(),
            expiration,
            reject: None,
            omit_delegation_signature: false,
            logins: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn rejecting(mut self, step: AuthorityStep) -> Self {
        self.reject = Some(step);
        self
    }

    /// Answer delegation requests without the authority signature
    pub fn without_delegation_signature(mut self) -> Self {
        self.omit_delegation_signature = true;
        self
    }

    /// Login requests received so far
    pub fn logins(&self) -> Vec<LoginRequest> {
        self.logins
            .lock()
            .map(|logins| logins.clone())
            .unwrap_or_default()
    }

    fn check(&self, step: AuthorityStep, call: &str) -> Result<()> {
        if self.reject == Some(step) {
            Err(AuthError::rejected(call, "mock authority rejection"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AuthorityClient for MockAuthority {
    async fn prepare_login(&self, address: &str) -> Result<String> {
        self.check(AuthorityStep::PrepareLogin, "prepare_login")?;
        Ok(format!("{} {address}", self.challenge))
    }

    async fn login(&self, request: &LoginRequest) -> Result<LoginDetails> {
        if let Ok(mut logins) = self.logins.lock() {
            logins.push(request.clone());
        }
        self.check(AuthorityStep::Login, "login")?;
        Ok(LoginDetails {
            root_public_key: self.root_public_key.clone(),
            expiration: self.expiration,
        })
    }

    async fn get_delegation(
        &self,
        _address: &str,
        session_public_key: &[u8],
        expiration: u64,
    ) -> Result<DelegationRecord> {
        self.check(AuthorityStep::GetDelegation, "get_delegation")?;
        let signature = (!self.omit_delegation_signature).then(|| "a1".repeat(32));
        Ok(DelegationRecord {
            delegation: Some(RawDelegation {
                pubkey: Some(hex::encode(session_public_key)),
                expiration: Some(expiration),
                targets: None,
            }),
            signature,
        })
    }

    async fn get_principal(&self, _address: &str) -> Result<Principal> {
        Ok(Principal::self_authenticating(&self.root_public_key))
    }
}
