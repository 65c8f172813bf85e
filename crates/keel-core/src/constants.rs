/// Namespace prefix for per-session records in a [`crate::Storage`] backend.
pub const SESSION_KEY_PREFIX: &str = "keel:session:";

/// Field names inside a session record.
pub mod session_fields {
    pub const REFRESH_TOKEN: &str = "refreshToken";
    pub const CLIENT_ID: &str = "clientId";
    pub const CLIENT_SECRET: &str = "clientSecret";
    pub const CLIENT_TYPE: &str = "clientType";
    pub const ISSUER: &str = "issuer";
    pub const DPOP: &str = "dpop";
    pub const REDIRECT_URL: &str = "redirectUrl";
}

/// Access tokens expiring within this window are refreshed ahead of time.
pub const REFRESH_SKEW_SECONDS: i64 = 30;
