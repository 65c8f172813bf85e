#![deny(clippy::unwrap_used)]

pub mod dependencies;
pub mod handlers;
pub mod http;
pub mod issuer;
pub mod refresher;
pub mod registrar;
pub mod session;
pub mod token_endpoint;

pub use dependencies::{build_client_authentication, ClientOptions};
pub use handlers::{AggregateOidcHandler, RefreshTokenOidcHandler};
pub use http::{default_http_client, DEFAULT_HTTP_TIMEOUT};
pub use issuer::HttpIssuerConfigFetcher;
pub use refresher::OidcTokenRefresher;
pub use registrar::{RegistrationOptions, StorageClientRegistrar};
pub use session::ClientAuthentication;
pub use token_endpoint::{ClientAuthMethod, TokenEndpointClient, TokenEndpointError, TokenResponse};
