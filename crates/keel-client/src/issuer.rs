use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use keel_core::{AuthError, AuthResult, IssuerConfig, IssuerConfigFetcher};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::http::describe_json_error;

const WELL_KNOWN_PATH: &str = ".well-known/openid-configuration";

/// Resolves issuer metadata through OpenID Connect discovery.
///
/// Documents are cached per issuer for the lifetime of the fetcher; issuer
/// metadata is treated as stable.
#[derive(Clone)]
pub struct HttpIssuerConfigFetcher {
    client: reqwest::Client,
    cache: Arc<RwLock<HashMap<String, IssuerConfig>>>,
}

impl HttpIssuerConfigFetcher {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn discover(&self, issuer: &str) -> AuthResult<IssuerConfig> {
        let failure = |reason: String| AuthError::IssuerDiscovery {
            issuer: issuer.to_string(),
            reason,
        };

        let well_known = discovery_url(issuer).map_err(failure)?;
        let response = self
            .client
            .get(well_known.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|err| failure(format!("request failed: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failure(format!("{well_known} returned {status}")));
        }
        let body = response
            .text()
            .await
            .map_err(|err| failure(format!("failed to read body: {err}")))?;
        let config: IssuerConfig = serde_json::from_str(&body).map_err(|err| {
            failure(format!(
                "malformed discovery document: {}",
                describe_json_error(&err)
            ))
        })?;

        if normalize_issuer(&config.issuer) != normalize_issuer(issuer) {
            return Err(failure(format!(
                "discovery document names issuer [{}]",
                config.issuer
            )));
        }
        if config.token_endpoint.trim().is_empty() {
            return Err(failure("discovery document has no token endpoint".to_string()));
        }
        Ok(config)
    }
}

#[async_trait]
impl IssuerConfigFetcher for HttpIssuerConfigFetcher {
    async fn fetch_config(&self, issuer: &str) -> AuthResult<IssuerConfig> {
        let key = normalize_issuer(issuer).to_string();
        {
            let cache = self.cache.read().await;
            if let Some(config) = cache.get(&key) {
                return Ok(config.clone());
            }
        }

        let config = self.discover(issuer).await.inspect_err(|err| {
            warn!(event = "oidc_discovery_failed", issuer = %issuer, error = %err);
        })?;
        debug!(
            event = "oidc_discovery_fetched",
            issuer = %issuer,
            token_endpoint = %config.token_endpoint,
            dpop = config.supports_dpop()
        );
        self.cache.write().await.insert(key, config.clone());
        Ok(config)
    }
}

fn normalize_issuer(issuer: &str) -> &str {
    issuer.trim_end_matches('/')
}

fn discovery_url(issuer: &str) -> Result<Url, String> {
    let base = format!("{}/", normalize_issuer(issuer));
    let base = Url::parse(&base).map_err(|err| format!("invalid issuer url: {err}"))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(format!("unsupported issuer scheme: {}", base.scheme()));
    }
    base.join(WELL_KNOWN_PATH)
        .map_err(|err| format!("invalid issuer url: {err}"))
}
