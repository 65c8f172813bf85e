use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use keel_core::session_fields::REFRESH_TOKEN;
use keel_core::{
    AuthError, AuthResult, ClientRegistrar, DpopClaims, DpopKey, IssuerConfigFetcher, Secret,
    SessionRef, StorageUtility, StoredContext, TokenRefresher, TokenSet,
};
use tracing::{info, warn};

use crate::token_endpoint::{TokenEndpointClient, TokenResponse};

/// Performs refresh-token grants for stored sessions and persists rotated
/// refresh tokens.
///
/// Preconditions are checked before any network traffic: a missing refresh
/// token fails without touching storage, and a DPoP session without a key
/// fails after reading only the stored session record.
pub struct OidcTokenRefresher {
    storage: StorageUtility,
    issuer_config_fetcher: Arc<dyn IssuerConfigFetcher>,
    client_registrar: Arc<dyn ClientRegistrar>,
    http: reqwest::Client,
}

impl OidcTokenRefresher {
    #[must_use]
    pub fn new(
        storage: StorageUtility,
        issuer_config_fetcher: Arc<dyn IssuerConfigFetcher>,
        client_registrar: Arc<dyn ClientRegistrar>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            storage,
            issuer_config_fetcher,
            client_registrar,
            http,
        }
    }
}

#[async_trait]
impl TokenRefresher for OidcTokenRefresher {
    async fn refresh(
        &self,
        session_id: &str,
        refresh_token: Option<&str>,
        dpop_key: Option<&dyn DpopKey>,
    ) -> AuthResult<TokenSet> {
        let Some(refresh_token) = refresh_token else {
            return Err(AuthError::MissingRefreshToken {
                session_id: session_id.to_string(),
            });
        };

        let stored = StoredContext::load(session_id, &self.storage).await?;
        if stored.dpop && dpop_key.is_none() {
            return Err(AuthError::MissingDpopKey {
                session_id: session_id.to_string(),
            });
        }

        let redirect_url = stored.redirect_url.clone();
        let context = stored.resolve(self.issuer_config_fetcher.as_ref()).await?;
        let session = SessionRef {
            session_id: session_id.to_string(),
            redirect_url,
        };
        let client = self
            .client_registrar
            .get_client(&session, &context.issuer_config)
            .await?;

        let endpoint = TokenEndpointClient::new(&self.http, &context.issuer_config, &client);
        let dpop_proof = match dpop_key.filter(|_| context.dpop) {
            Some(key) => Some(
                key.proof(&DpopClaims::new("POST", endpoint.token_endpoint()))
                    .map_err(|source| AuthError::DpopProof {
                        session_id: session_id.to_string(),
                        source,
                    })?,
            ),
            None => None,
        };

        let response = endpoint
            .refresh(refresh_token, dpop_proof.as_deref())
            .await
            .map_err(|err| {
                warn!(
                    event = "token_refresh_failed",
                    session_id = %session_id,
                    issuer = %context.issuer_config.issuer,
                    error = %err
                );
                AuthError::TokenEndpoint {
                    session_id: session_id.to_string(),
                    source: Box::new(err),
                }
            })?;

        let tokens = into_token_set(response).ok_or_else(|| {
            warn!(
                event = "token_refresh_missing_access_token",
                session_id = %session_id,
                issuer = %context.issuer_config.issuer
            );
            AuthError::InvalidTokenResponse {
                session_id: session_id.to_string(),
                issuer: context.issuer_config.issuer.clone(),
            }
        })?;

        if let Some(rotated) = tokens.refresh_token.as_ref() {
            self.storage
                .set_for_user(session_id, &[(REFRESH_TOKEN, rotated.expose())])
                .await?;
        }
        info!(
            event = "token_refreshed",
            session_id = %session_id,
            rotated = tokens.refresh_token.is_some(),
            dpop = dpop_proof.is_some(),
            expires_in = ?tokens.expires_in
        );
        Ok(tokens)
    }
}

fn into_token_set(response: TokenResponse) -> Option<TokenSet> {
    let access_token = response
        .access_token
        .filter(|token| !token.is_empty())
        .map(Secret::from)?;
    let expires_at = response
        .expires_in
        .map(|seconds| Utc::now() + ChronoDuration::seconds(seconds));
    Some(TokenSet {
        access_token,
        refresh_token: response
            .refresh_token
            .filter(|token| !token.is_empty())
            .map(Secret::from),
        id_token: response.id_token.map(Secret::from),
        token_type: response.token_type,
        scope: response.scope,
        expires_in: response.expires_in,
        expires_at,
    })
}
