use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Client used for discovery, registration and token requests.
/// `accept_invalid_certs` is meant for local identity providers only.
pub fn default_http_client(timeout: Duration, accept_invalid_certs: bool) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()
        .unwrap_or_else(|err| {
            warn!(event = "oidc_http_client_failed", error = %err);
            reqwest::Client::new()
        })
}

#[derive(Deserialize)]
struct OAuthErrorResponse {
    error: String,
}

const MAX_ERROR_CODE_LEN: usize = 64;

/// The `error` code of an OAuth error body. The free-text description is
/// dropped because providers may echo request parameters in it, and codes
/// outside the RFC 6749 section 5.2 charset are dropped as well.
pub(crate) fn oauth_error_code(body: &str) -> Option<String> {
    serde_json::from_str::<OAuthErrorResponse>(body)
        .ok()
        .map(|response| response.error)
        .filter(|code| is_error_code(code))
}

fn is_error_code(code: &str) -> bool {
    !code.is_empty()
        && code.len() <= MAX_ERROR_CODE_LEN
        && code
            .bytes()
            .all(|byte| matches!(byte, 0x20..=0x21 | 0x23..=0x5B | 0x5D..=0x7E))
}

/// Position and category of a JSON failure, without the offending input.
pub(crate) fn describe_json_error(err: &serde_json::Error) -> String {
    format!(
        "{:?} error at line {} column {}",
        err.classify(),
        err.line(),
        err.column()
    )
}
