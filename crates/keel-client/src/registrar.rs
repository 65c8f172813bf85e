use async_trait::async_trait;
use keel_core::session_fields::{CLIENT_ID, CLIENT_SECRET, CLIENT_TYPE, DPOP, REDIRECT_URL};
use keel_core::{
    AuthError, AuthResult, ClientRegistrar, ClientRegistration, IssuerConfig, RegistrationType,
    Secret, SessionRef, StorageUtility,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::http::{describe_json_error, oauth_error_code};

#[derive(Debug, Clone)]
pub struct RegistrationOptions {
    pub client_name: String,
    pub redirect_uris: Vec<String>,
}

impl Default for RegistrationOptions {
    fn default() -> Self {
        Self {
            client_name: "keel".to_string(),
            redirect_uris: Vec::new(),
        }
    }
}

#[derive(Serialize)]
struct RegistrationRequest<'a> {
    client_name: &'a str,
    application_type: &'static str,
    redirect_uris: Vec<String>,
    subject_type: &'static str,
    grant_types: [&'static str; 2],
    response_types: [&'static str; 1],
    token_endpoint_auth_method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dpop_bound_access_tokens: Option<bool>,
}

#[derive(Deserialize)]
struct RegistrationResponse {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
}

/// Client registrar backed by session storage, falling back to dynamic
/// registration (RFC 7591) when the session has no client yet.
pub struct StorageClientRegistrar {
    storage: StorageUtility,
    http: reqwest::Client,
    options: RegistrationOptions,
}

impl StorageClientRegistrar {
    #[must_use]
    pub fn new(storage: StorageUtility, http: reqwest::Client, options: RegistrationOptions) -> Self {
        Self {
            storage,
            http,
            options,
        }
    }

    async fn register(
        &self,
        session: &SessionRef,
        registration_endpoint: &str,
        dpop: bool,
        stored_redirect: Option<String>,
    ) -> AuthResult<ClientRegistration> {
        let failure = |reason: String| AuthError::ClientRegistration {
            session_id: session.session_id.clone(),
            reason,
        };

        let redirect_uris = session
            .redirect_url
            .clone()
            .or(stored_redirect)
            .map(|url| vec![url])
            .unwrap_or_else(|| self.options.redirect_uris.clone());
        let request = RegistrationRequest {
            client_name: &self.options.client_name,
            application_type: "web",
            redirect_uris,
            subject_type: "public",
            grant_types: ["authorization_code", "refresh_token"],
            response_types: ["code"],
            token_endpoint_auth_method: if dpop { "none" } else { "client_secret_basic" },
            dpop_bound_access_tokens: dpop.then_some(true),
        };

        let response = self
            .http
            .post(registration_endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|err| failure(format!("registration request failed: {err}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| failure(format!("failed to read registration response: {err}")))?;
        if !status.is_success() {
            let code = oauth_error_code(&body).unwrap_or_else(|| "unknown".to_string());
            return Err(failure(format!("registration endpoint returned {status} ({code})")));
        }
        let registered: RegistrationResponse = serde_json::from_str(&body).map_err(|err| {
            failure(format!(
                "malformed registration response: {}",
                describe_json_error(&err)
            ))
        })?;

        let client = ClientRegistration {
            client_id: registered.client_id,
            client_secret: registered.client_secret.map(Secret::from),
            registration_type: RegistrationType::Dynamic,
        };
        let mut fields = vec![
            (CLIENT_ID, client.client_id.as_str()),
            (CLIENT_TYPE, RegistrationType::Dynamic.as_str()),
        ];
        if let Some(secret) = client.client_secret.as_ref() {
            fields.push((CLIENT_SECRET, secret.expose()));
        }
        self.storage
            .set_for_user(&session.session_id, &fields)
            .await?;
        info!(
            event = "client_registered",
            session_id = %session.session_id,
            client_id = %client.client_id,
            public = client.is_public()
        );
        Ok(client)
    }
}

#[async_trait]
impl ClientRegistrar for StorageClientRegistrar {
    async fn get_client(
        &self,
        session: &SessionRef,
        issuer_config: &IssuerConfig,
    ) -> AuthResult<ClientRegistration> {
        let mut record = self
            .storage
            .get_for_user(&session.session_id)
            .await?
            .unwrap_or_default();

        if let Some(client_id) = record.remove(CLIENT_ID).filter(|id| !id.is_empty()) {
            let registration_type = record
                .get(CLIENT_TYPE)
                .and_then(|value| RegistrationType::parse(value))
                .unwrap_or(RegistrationType::Static);
            return Ok(ClientRegistration {
                client_id,
                client_secret: record.remove(CLIENT_SECRET).map(Secret::from),
                registration_type,
            });
        }

        let Some(endpoint) = issuer_config.registration_endpoint.as_deref() else {
            warn!(
                event = "client_registration_unavailable",
                session_id = %session.session_id,
                issuer = %issuer_config.issuer
            );
            return Err(AuthError::ClientRegistration {
                session_id: session.session_id.clone(),
                reason: format!(
                    "no stored client and issuer [{}] does not support dynamic registration",
                    issuer_config.issuer
                ),
            });
        };
        let dpop = record.get(DPOP).map(String::as_str) == Some("true");
        self.register(session, endpoint, dpop, record.remove(REDIRECT_URL))
            .await
    }
}
