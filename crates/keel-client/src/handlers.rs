use std::sync::Arc;

use async_trait::async_trait;
use keel_core::session_fields::{
    CLIENT_ID, CLIENT_SECRET, CLIENT_TYPE, DPOP, ISSUER, REDIRECT_URL, REFRESH_TOKEN,
};
use keel_core::{
    AuthError, AuthResult, DpopKey, LoginOptions, LoginOutcome, OidcHandler, RegistrationType,
    SessionInfo, StorageUtility, TokenRefresher,
};
use tracing::{debug, warn};

/// Delegates to the first registered handler that accepts the options.
/// Registration order is the resolution order.
pub struct AggregateOidcHandler {
    handlers: Vec<Arc<dyn OidcHandler>>,
}

impl AggregateOidcHandler {
    #[must_use]
    pub fn new(handlers: Vec<Arc<dyn OidcHandler>>) -> Self {
        Self { handlers }
    }

    fn select(&self, options: &LoginOptions) -> Option<&Arc<dyn OidcHandler>> {
        self.handlers
            .iter()
            .find(|handler| handler.can_handle(options))
    }
}

#[async_trait]
impl OidcHandler for AggregateOidcHandler {
    fn can_handle(&self, options: &LoginOptions) -> bool {
        self.select(options).is_some()
    }

    async fn handle(
        &self,
        options: &LoginOptions,
        dpop_key: Option<&dyn DpopKey>,
    ) -> AuthResult<LoginOutcome> {
        let Some(handler) = self.select(options) else {
            return Err(AuthError::NoHandler {
                session_id: options.session_id.clone(),
            });
        };
        handler.handle(options, dpop_key).await
    }
}

/// Logs a session in from an existing refresh token: records the issuer and
/// the statically provisioned client, then refreshes. A failed refresh puts
/// the session record back as it was before the login.
pub struct RefreshTokenOidcHandler {
    storage: StorageUtility,
    refresher: Arc<dyn TokenRefresher>,
}

impl RefreshTokenOidcHandler {
    #[must_use]
    pub fn new(storage: StorageUtility, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self { storage, refresher }
    }
}

#[async_trait]
impl OidcHandler for RefreshTokenOidcHandler {
    fn can_handle(&self, options: &LoginOptions) -> bool {
        options.refresh_token.is_some()
            && options.oidc_issuer.is_some()
            && options.client_id.is_some()
    }

    async fn handle(
        &self,
        options: &LoginOptions,
        dpop_key: Option<&dyn DpopKey>,
    ) -> AuthResult<LoginOutcome> {
        let session_id = options.session_id.as_str();
        let (Some(refresh_token), Some(issuer), Some(client_id)) = (
            options.refresh_token.as_ref(),
            options.oidc_issuer.as_deref(),
            options.client_id.as_deref(),
        ) else {
            return Err(AuthError::NoHandler {
                session_id: session_id.to_string(),
            });
        };

        let dpop = if options.dpop { "true" } else { "false" };
        let mut fields = vec![
            (ISSUER, issuer),
            (CLIENT_ID, client_id),
            (CLIENT_TYPE, RegistrationType::Static.as_str()),
            (DPOP, dpop),
            (REFRESH_TOKEN, refresh_token.expose()),
        ];
        if let Some(secret) = options.client_secret.as_ref() {
            fields.push((CLIENT_SECRET, secret.expose()));
        }
        if let Some(redirect_url) = options.redirect_url.as_deref() {
            fields.push((REDIRECT_URL, redirect_url));
        }
        let previous = self.storage.get_for_user(session_id).await?;
        self.storage.set_for_user(session_id, &fields).await?;
        debug!(event = "refresh_login_seeded", session_id = %session_id, issuer = %issuer);

        let tokens = match self
            .refresher
            .refresh(session_id, Some(refresh_token.expose()), dpop_key)
            .await
        {
            Ok(tokens) => tokens,
            Err(err) => {
                if let Err(restore_err) = self
                    .storage
                    .restore_for_user(session_id, previous.as_ref())
                    .await
                {
                    warn!(
                        event = "refresh_login_rollback_failed",
                        session_id = %session_id,
                        error = %restore_err
                    );
                }
                return Err(err);
            }
        };
        Ok(LoginOutcome {
            info: SessionInfo {
                session_id: session_id.to_string(),
                is_logged_in: true,
                expiration_date: tokens.expires_at,
            },
            tokens,
        })
    }
}
