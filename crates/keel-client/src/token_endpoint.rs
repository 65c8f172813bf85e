use keel_core::{ClientRegistration, IssuerConfig};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::debug;
use url::form_urlencoded;

use crate::http::{describe_json_error, oauth_error_code};

/// How the client authenticates to the token endpoint (RFC 6749 section 2.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthMethod {
    ClientSecretBasic,
    ClientSecretPost,
    None,
}

impl ClientAuthMethod {
    /// Basic unless the issuer only advertises `client_secret_post`; public
    /// clients send just their id.
    #[must_use]
    pub fn select(client: &ClientRegistration, issuer_config: &IssuerConfig) -> Self {
        if client.client_secret.is_none() {
            return Self::None;
        }
        let methods = &issuer_config.token_endpoint_auth_methods_supported;
        let post_only = methods.iter().any(|method| method == "client_secret_post")
            && !methods.iter().any(|method| method == "client_secret_basic");
        if post_only {
            Self::ClientSecretPost
        } else {
            Self::ClientSecretBasic
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TokenEndpointError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("token endpoint returned {status}{}", code_suffix(.error))]
    Status { status: u16, error: Option<String> },
    #[error("malformed token response: {0}")]
    Malformed(String),
}

fn code_suffix(error: &Option<String>) -> String {
    error
        .as_deref()
        .map(|code| format!(" ({code})"))
        .unwrap_or_default()
}

/// Token endpoint response body. `access_token` stays optional here so a
/// response without one can be told apart from one that fails to parse.
#[derive(Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Token endpoint bound to one issuer and one client registration.
pub struct TokenEndpointClient<'a> {
    http: &'a reqwest::Client,
    token_endpoint: &'a str,
    client: &'a ClientRegistration,
    auth_method: ClientAuthMethod,
}

impl<'a> TokenEndpointClient<'a> {
    #[must_use]
    pub fn new(
        http: &'a reqwest::Client,
        issuer_config: &'a IssuerConfig,
        client: &'a ClientRegistration,
    ) -> Self {
        Self {
            http,
            token_endpoint: &issuer_config.token_endpoint,
            client,
            auth_method: ClientAuthMethod::select(client, issuer_config),
        }
    }

    #[must_use]
    pub fn token_endpoint(&self) -> &str {
        self.token_endpoint
    }

    #[must_use]
    pub fn auth_method(&self) -> ClientAuthMethod {
        self.auth_method
    }

    /// Performs a `refresh_token` grant, attaching `dpop_proof` as the
    /// `DPoP` header when given.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        dpop_proof: Option<&str>,
    ) -> Result<TokenResponse, TokenEndpointError> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let secret = self.client.client_secret.as_ref().map(|secret| secret.expose());
        match (self.auth_method, secret) {
            (ClientAuthMethod::ClientSecretPost, Some(secret)) => {
                params.push(("client_id", self.client.client_id.as_str()));
                params.push(("client_secret", secret));
            }
            (ClientAuthMethod::ClientSecretBasic, Some(_)) => {}
            _ => params.push(("client_id", self.client.client_id.as_str())),
        }

        let mut request = self
            .http
            .post(self.token_endpoint)
            .header(ACCEPT, "application/json")
            .form(&params);
        if let (ClientAuthMethod::ClientSecretBasic, Some(secret)) = (self.auth_method, secret) {
            request = request.basic_auth(
                form_encode(&self.client.client_id),
                Some(form_encode(secret)),
            );
        }
        if let Some(proof) = dpop_proof {
            request = request.header("DPoP", proof);
        }

        debug!(
            event = "token_request",
            endpoint = %self.token_endpoint,
            auth_method = ?self.auth_method,
            dpop = dpop_proof.is_some()
        );
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TokenEndpointError::Status {
                status: status.as_u16(),
                error: oauth_error_code(&body),
            });
        }
        serde_json::from_str::<TokenResponse>(&body)
            .map_err(|err| TokenEndpointError::Malformed(describe_json_error(&err)))
    }
}

/// Client credentials in HTTP Basic are form-encoded first (RFC 6749 2.3.1).
fn form_encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
