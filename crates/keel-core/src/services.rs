use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    AuthResult, BoxError, ClientRegistration, IssuerConfig, LoginOptions, LoginOutcome,
    SessionRef, TokenSet,
};

#[async_trait]
pub trait IssuerConfigFetcher: Send + Sync {
    async fn fetch_config(&self, issuer: &str) -> AuthResult<IssuerConfig>;
}

#[async_trait]
pub trait ClientRegistrar: Send + Sync {
    async fn get_client(
        &self,
        session: &SessionRef,
        issuer_config: &IssuerConfig,
    ) -> AuthResult<ClientRegistration>;
}

/// Payload of a DPoP proof JWT (RFC 9449 section 4.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpopClaims {
    pub htm: String,
    pub htu: String,
    pub iat: i64,
    pub jti: String,
}

impl DpopClaims {
    #[must_use]
    pub fn new(method: &str, url: &str) -> Self {
        Self {
            htm: method.to_string(),
            htu: url.to_string(),
            iat: Utc::now().timestamp(),
            jti: Uuid::now_v7().to_string(),
        }
    }
}

/// Caller-held key bound to a session's DPoP access tokens.
///
/// Implementations sign `claims` into a compact JWS carrying the public key
/// in its header. The private key stays with the caller.
pub trait DpopKey: Send + Sync {
    fn proof(&self, claims: &DpopClaims) -> Result<String, BoxError>;
}

#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(
        &self,
        session_id: &str,
        refresh_token: Option<&str>,
        dpop_key: Option<&dyn DpopKey>,
    ) -> AuthResult<TokenSet>;
}

/// One strategy in the login handler chain.
#[async_trait]
pub trait OidcHandler: Send + Sync {
    fn can_handle(&self, options: &LoginOptions) -> bool;
    async fn handle(
        &self,
        options: &LoginOptions,
        dpop_key: Option<&dyn DpopKey>,
    ) -> AuthResult<LoginOutcome>;
}
