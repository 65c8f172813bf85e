use std::sync::Arc;

use keel_core::{OidcHandler, Storage, StorageUtility};

use crate::handlers::{AggregateOidcHandler, RefreshTokenOidcHandler};
use crate::issuer::HttpIssuerConfigFetcher;
use crate::refresher::OidcTokenRefresher;
use crate::registrar::{RegistrationOptions, StorageClientRegistrar};
use crate::session::ClientAuthentication;

#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub registration: RegistrationOptions,
}

/// Wires the default service graph over one storage backend and one HTTP
/// client. The issuer cache lives as long as the returned value.
pub fn build_client_authentication(
    storage: Arc<dyn Storage>,
    http: reqwest::Client,
    options: ClientOptions,
) -> ClientAuthentication {
    let storage = StorageUtility::new(storage);
    let issuer_config_fetcher = Arc::new(HttpIssuerConfigFetcher::new(http.clone()));
    let client_registrar = Arc::new(StorageClientRegistrar::new(
        storage.clone(),
        http.clone(),
        options.registration,
    ));
    let refresher = Arc::new(OidcTokenRefresher::new(
        storage.clone(),
        issuer_config_fetcher,
        client_registrar,
        http,
    ));
    let handlers: Vec<Arc<dyn OidcHandler>> = vec![Arc::new(RefreshTokenOidcHandler::new(
        storage.clone(),
        refresher.clone(),
    ))];
    ClientAuthentication::new(
        Arc::new(AggregateOidcHandler::new(handlers)),
        refresher,
        storage,
    )
}
