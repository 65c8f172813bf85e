use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use keel_core::session_fields::REFRESH_TOKEN;
use keel_core::{
    AuthError, AuthResult, DpopKey, LoginOptions, OidcHandler, Secret, SessionInfo,
    StorageUtility, TokenRefresher, TokenSet, REFRESH_SKEW_SECONDS,
};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Session-level entry point: logs sessions in through the handler chain,
/// hands out access tokens and refreshes them when they are about to expire.
///
/// Access tokens are kept in memory only; the refresh token and client
/// data live in storage.
pub struct ClientAuthentication {
    handler: Arc<dyn OidcHandler>,
    refresher: Arc<dyn TokenRefresher>,
    storage: StorageUtility,
    tokens: RwLock<HashMap<String, TokenSet>>,
}

impl ClientAuthentication {
    #[must_use]
    pub fn new(
        handler: Arc<dyn OidcHandler>,
        refresher: Arc<dyn TokenRefresher>,
        storage: StorageUtility,
    ) -> Self {
        Self {
            handler,
            refresher,
            storage,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn storage(&self) -> &StorageUtility {
        &self.storage
    }

    pub async fn login(
        &self,
        options: &LoginOptions,
        dpop_key: Option<&dyn DpopKey>,
    ) -> AuthResult<SessionInfo> {
        let outcome = self.handler.handle(options, dpop_key).await?;
        self.tokens
            .write()
            .await
            .insert(options.session_id.clone(), outcome.tokens);
        info!(
            event = "session_logged_in",
            session_id = %options.session_id,
            expires_at = ?outcome.info.expiration_date
        );
        Ok(outcome.info)
    }

    /// Returns a usable access token for the session, refreshing it first when
    /// none is cached or the cached one expires within the refresh skew.
    pub async fn access_token(
        &self,
        session_id: &str,
        dpop_key: Option<&dyn DpopKey>,
    ) -> AuthResult<Secret> {
        let skew = ChronoDuration::seconds(REFRESH_SKEW_SECONDS);
        {
            let tokens = self.tokens.read().await;
            if let Some(cached) = tokens.get(session_id) {
                if !cached.expires_within(skew, Utc::now()) {
                    return Ok(cached.access_token.clone());
                }
            }
        }

        let tokens = self.refresh(session_id, dpop_key).await?;
        Ok(tokens.access_token)
    }

    /// Forces a refresh using the stored refresh token.
    pub async fn refresh(
        &self,
        session_id: &str,
        dpop_key: Option<&dyn DpopKey>,
    ) -> AuthResult<TokenSet> {
        let refresh_token = self
            .storage
            .get_for_user_key(session_id, REFRESH_TOKEN)
            .await?
            .map(Secret::from);
        debug!(
            event = "session_refresh_requested",
            session_id = %session_id,
            has_refresh_token = refresh_token.is_some()
        );
        let tokens = self
            .refresher
            .refresh(
                session_id,
                refresh_token.as_ref().map(Secret::expose),
                dpop_key,
            )
            .await?;
        self.tokens
            .write()
            .await
            .insert(session_id.to_string(), tokens.clone());
        Ok(tokens)
    }

    pub async fn session_info(&self, session_id: &str) -> AuthResult<SessionInfo> {
        let expiration_date = self
            .tokens
            .read()
            .await
            .get(session_id)
            .and_then(|tokens| tokens.expires_at);
        let is_logged_in = self
            .storage
            .get_for_user_key(session_id, REFRESH_TOKEN)
            .await?
            .is_some();
        Ok(SessionInfo {
            session_id: session_id.to_string(),
            is_logged_in,
            expiration_date,
        })
    }

    /// Drops cached tokens and every stored field of the session.
    pub async fn logout(&self, session_id: &str) -> AuthResult<()> {
        if self.storage.get_for_user(session_id).await?.is_none() {
            return Err(AuthError::SessionNotFound {
                session_id: session_id.to_string(),
            });
        }
        self.storage.delete_all_user_data(session_id).await?;
        self.tokens.write().await.remove(session_id);
        info!(event = "session_logged_out", session_id = %session_id);
        Ok(())
    }
}
