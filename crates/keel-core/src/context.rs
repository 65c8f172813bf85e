use tracing::debug;

use crate::session_fields::{DPOP, ISSUER, REDIRECT_URL};
use crate::{AuthError, AuthResult, IssuerConfigFetcher, OidcContext, StorageUtility};

/// Session context as stored, before the issuer is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContext {
    pub issuer: String,
    pub dpop: bool,
    pub redirect_url: Option<String>,
}

impl StoredContext {
    /// Reads the session record without touching the network.
    pub async fn load(session_id: &str, storage: &StorageUtility) -> AuthResult<Self> {
        let record = storage
            .get_for_user(session_id)
            .await?
            .ok_or_else(|| AuthError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        let issuer = record
            .get(ISSUER)
            .filter(|value| !value.is_empty())
            .cloned()
            .ok_or_else(|| AuthError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        Ok(Self {
            issuer,
            dpop: record.get(DPOP).map(String::as_str) == Some("true"),
            redirect_url: record.get(REDIRECT_URL).cloned(),
        })
    }

    pub async fn resolve(self, fetcher: &dyn IssuerConfigFetcher) -> AuthResult<OidcContext> {
        let issuer_config = fetcher.fetch_config(&self.issuer).await?;
        Ok(OidcContext {
            issuer_config,
            dpop: self.dpop,
            redirect_url: self.redirect_url,
        })
    }
}

pub async fn load_oidc_context(
    session_id: &str,
    storage: &StorageUtility,
    fetcher: &dyn IssuerConfigFetcher,
) -> AuthResult<OidcContext> {
    let stored = StoredContext::load(session_id, storage).await?;
    debug!(
        event = "oidc_context_loaded",
        session_id = %session_id,
        issuer = %stored.issuer,
        dpop = stored.dpop
    );
    stored.resolve(fetcher).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::{InMemoryStorage, IssuerConfig};

    struct FixedFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IssuerConfigFetcher for FixedFetcher {
        async fn fetch_config(&self, issuer: &str) -> AuthResult<IssuerConfig> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(IssuerConfig {
                issuer: issuer.to_string(),
                authorization_endpoint: format!("{issuer}/auth"),
                token_endpoint: format!("{issuer}/token"),
                jwks_uri: format!("{issuer}/jwks"),
                registration_endpoint: None,
                userinfo_endpoint: None,
                end_session_endpoint: None,
                grant_types_supported: vec!["refresh_token".to_string()],
                token_endpoint_auth_methods_supported: Vec::new(),
                scopes_supported: Vec::new(),
                dpop_signing_alg_values_supported: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn loads_issuer_and_dpop_flag() {
        let storage = StorageUtility::new(Arc::new(InMemoryStorage::new()));
        storage
            .set_for_user(
                "abc",
                &[
                    (ISSUER, "https://idp.example"),
                    (DPOP, "true"),
                    (REDIRECT_URL, "https://app.example/cb"),
                ],
            )
            .await
            .expect("seed");
        let fetcher = FixedFetcher {
            calls: AtomicUsize::new(0),
        };

        let context = load_oidc_context("abc", &storage, &fetcher)
            .await
            .expect("context");
        assert!(context.dpop);
        assert_eq!(context.issuer_config.token_endpoint, "https://idp.example/token");
        assert_eq!(context.redirect_url.as_deref(), Some("https://app.example/cb"));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dpop_requires_literal_true() {
        let storage = StorageUtility::new(Arc::new(InMemoryStorage::new()));
        storage
            .set_for_user("abc", &[(ISSUER, "https://idp.example"), (DPOP, "yes")])
            .await
            .expect("seed");
        let stored = StoredContext::load("abc", &storage).await.expect("stored");
        assert!(!stored.dpop);
    }

    #[tokio::test]
    async fn missing_issuer_is_session_not_found() {
        let storage = StorageUtility::new(Arc::new(InMemoryStorage::new()));
        let fetcher = FixedFetcher {
            calls: AtomicUsize::new(0),
        };
        let err = load_oidc_context("ghost", &storage, &fetcher)
            .await
            .expect_err("missing");
        assert!(matches!(err, AuthError::SessionNotFound { .. }));

        storage
            .set_for_user("abc", &[(DPOP, "false")])
            .await
            .expect("seed");
        let err = load_oidc_context("abc", &storage, &fetcher)
            .await
            .expect_err("no issuer");
        assert!(matches!(err, AuthError::SessionNotFound { .. }));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }
}
