use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures of the session refresh pipeline and its collaborators.
///
/// Messages name the session or issuer involved and never carry token
/// material or client secrets.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("session [{session_id}] has no refresh token to allow it to refresh its access token")]
    MissingRefreshToken { session_id: String },
    #[error(
        "session [{session_id}] uses DPoP-bound tokens; the key bound to the access token must be provided to refresh it"
    )]
    MissingDpopKey { session_id: String },
    #[error("token endpoint request failed for session [{session_id}]: {source}")]
    TokenEndpoint {
        session_id: String,
        #[source]
        source: BoxError,
    },
    #[error(
        "the identity provider [{issuer}] did not return an access token on refresh of session [{session_id}]"
    )]
    InvalidTokenResponse { session_id: String, issuer: String },
    #[error("issuer discovery failed for [{issuer}]: {reason}")]
    IssuerDiscovery { issuer: String, reason: String },
    #[error("no client registration available for session [{session_id}]: {reason}")]
    ClientRegistration { session_id: String, reason: String },
    #[error("session [{session_id}] has no stored OIDC context")]
    SessionNotFound { session_id: String },
    #[error("failed to build a DPoP proof for session [{session_id}]")]
    DpopProof {
        session_id: String,
        #[source]
        source: BoxError,
    },
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("no login handler accepts the options for session [{session_id}]")]
    NoHandler { session_id: String },
}

impl AuthError {
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Session the failure belongs to, when there is one.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::MissingRefreshToken { session_id }
            | Self::MissingDpopKey { session_id }
            | Self::TokenEndpoint { session_id, .. }
            | Self::InvalidTokenResponse { session_id, .. }
            | Self::ClientRegistration { session_id, .. }
            | Self::SessionNotFound { session_id }
            | Self::DpopProof { session_id, .. }
            | Self::NoHandler { session_id } => Some(session_id),
            Self::IssuerDiscovery { .. } | Self::Storage { .. } => None,
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
