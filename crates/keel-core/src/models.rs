use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::Secret;

/// Issuer metadata as published in an OpenID Connect discovery document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerConfig {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
    #[serde(default = "default_grant_types")]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub dpop_signing_alg_values_supported: Vec<String>,
}

fn default_grant_types() -> Vec<String> {
    vec!["authorization_code".to_string(), "implicit".to_string()]
}

impl IssuerConfig {
    #[must_use]
    pub fn supports_dpop(&self) -> bool {
        !self.dpop_signing_alg_values_supported.is_empty()
    }

    #[must_use]
    pub fn supports_grant(&self, grant_type: &str) -> bool {
        self.grant_types_supported.iter().any(|value| value == grant_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationType {
    Static,
    Dynamic,
}

impl RegistrationType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "static" => Some(Self::Static),
            "dynamic" => Some(Self::Dynamic),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRegistration {
    pub client_id: String,
    pub client_secret: Option<Secret>,
    pub registration_type: RegistrationType,
}

impl ClientRegistration {
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.client_secret.is_none()
    }
}

/// Reference to a session handed to the client registrar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    pub session_id: String,
    pub redirect_url: Option<String>,
}

impl SessionRef {
    #[must_use]
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            redirect_url: None,
        }
    }
}

/// Session state loaded from storage and resolved against the issuer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcContext {
    pub issuer_config: IssuerConfig,
    pub dpop: bool,
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: Secret,
    pub refresh_token: Option<Secret>,
    pub id_token: Option<Secret>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
    pub expires_in: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    /// True when the access token is expired or will be within `skew`.
    /// Token sets without a known expiry never report as expiring.
    #[must_use]
    pub fn expires_within(&self, skew: ChronoDuration, now: DateTime<Utc>) -> bool {
        self.expires_at
            .map(|expires_at| now + skew >= expires_at)
            .unwrap_or(false)
    }
}

/// Options accepted by the login handler chain.
#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    pub session_id: String,
    pub oidc_issuer: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<Secret>,
    pub refresh_token: Option<Secret>,
    pub redirect_url: Option<String>,
    pub dpop: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub is_logged_in: bool,
    pub expiration_date: Option<DateTime<Utc>>,
}

/// Result of a handled login: what the caller reports and what it caches.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub info: SessionInfo,
    pub tokens: TokenSet,
}
