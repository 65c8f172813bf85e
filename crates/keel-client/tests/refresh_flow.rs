use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keel_client::{
    build_client_authentication, default_http_client, ClientOptions, HttpIssuerConfigFetcher,
    OidcTokenRefresher, RegistrationOptions, StorageClientRegistrar,
};
use keel_core::session_fields::{CLIENT_ID, CLIENT_SECRET, CLIENT_TYPE, DPOP, ISSUER, REFRESH_TOKEN};
use keel_core::{
    AuthError, BoxError, DpopClaims, DpopKey, InMemoryStorage, LoginOptions, Secret,
    SessionRecord, StorageUtility, TokenRefresher,
};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;

struct TestKey;

impl DpopKey for TestKey {
    fn proof(&self, claims: &DpopClaims) -> Result<String, BoxError> {
        Ok(format!("proof.{}.{}", claims.htm, claims.jti))
    }
}

struct UnavailableKey;

impl DpopKey for UnavailableKey {
    fn proof(&self, _claims: &DpopClaims) -> Result<String, BoxError> {
        Err("signer unavailable".into())
    }
}

struct Harness {
    server: ServerGuard,
    storage: StorageUtility,
    refresher: OidcTokenRefresher,
}

impl Harness {
    async fn new() -> Self {
        Self::with_http(reqwest::Client::new()).await
    }

    async fn with_http(http: reqwest::Client) -> Self {
        let server = Server::new_async().await;
        let storage = StorageUtility::new(Arc::new(InMemoryStorage::new()));
        let refresher = OidcTokenRefresher::new(
            storage.clone(),
            Arc::new(HttpIssuerConfigFetcher::new(http.clone())),
            Arc::new(StorageClientRegistrar::new(
                storage.clone(),
                http.clone(),
                RegistrationOptions::default(),
            )),
            http,
        );
        Self {
            server,
            storage,
            refresher,
        }
    }

    fn issuer(&self) -> String {
        self.server.url()
    }

    async fn discovery(&mut self, registration: bool) -> Mock {
        self.discovery_expecting(registration, None).await
    }

    async fn discovery_expecting(&mut self, registration: bool, hits: Option<usize>) -> Mock {
        let issuer = self.issuer();
        let mut document = json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/auth"),
            "token_endpoint": format!("{issuer}/token"),
            "jwks_uri": format!("{issuer}/jwks"),
            "grant_types_supported": ["authorization_code", "refresh_token"],
            "dpop_signing_alg_values_supported": ["ES256"]
        });
        if registration {
            document["registration_endpoint"] = json!(format!("{issuer}/register"));
        }
        let mut mock = self
            .server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(document.to_string());
        if let Some(hits) = hits {
            mock = mock.expect(hits);
        }
        mock.create_async().await
    }

    async fn seed(&self, session_id: &str, extra: &[(&str, &str)]) {
        let issuer = self.issuer();
        let mut fields = vec![
            (ISSUER, issuer.as_str()),
            (CLIENT_ID, "static-client"),
            (CLIENT_SECRET, "static-secret"),
            (CLIENT_TYPE, "static"),
        ];
        fields.extend_from_slice(extra);
        self.storage
            .set_for_user(session_id, &fields)
            .await
            .expect("seed session");
    }

    async fn record(&self, session_id: &str) -> SessionRecord {
        self.storage
            .get_for_user(session_id)
            .await
            .expect("read session")
            .expect("session exists")
    }

    async fn stored_refresh_token(&self, session_id: &str) -> Option<String> {
        self.storage
            .get_for_user_key(session_id, REFRESH_TOKEN)
            .await
            .expect("read refresh token")
    }
}

#[tokio::test]
async fn refresh_rotates_and_persists_refresh_token() {
    let mut harness = Harness::new().await;
    let _discovery = harness.discovery(false).await;
    harness.seed("abc", &[(REFRESH_TOKEN, "rt-1")]).await;
    let token = harness
        .server
        .mock("POST", "/token")
        .match_header("authorization", Matcher::Regex("^Basic ".into()))
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            Matcher::UrlEncoded("refresh_token".into(), "rt-1".into()),
        ]))
        .with_status(200)
        .with_body(
            json!({
                "access_token": "at-1",
                "refresh_token": "rt-2",
                "token_type": "Bearer",
                "expires_in": 3600
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let tokens = harness
        .refresher
        .refresh("abc", Some("rt-1"), None)
        .await
        .expect("refresh");

    assert_eq!(tokens.access_token.expose(), "at-1");
    assert_eq!(tokens.refresh_token.as_ref().map(Secret::expose), Some("rt-2"));
    assert!(tokens.expires_at.is_some());
    assert_eq!(harness.stored_refresh_token("abc").await.as_deref(), Some("rt-2"));
    token.assert_async().await;
}

#[tokio::test]
async fn dpop_session_without_key_fails_before_network() {
    let mut harness = Harness::new().await;
    let discovery = harness.discovery_expecting(false, Some(0)).await;
    harness
        .seed("xyz", &[(REFRESH_TOKEN, "rt-9"), (DPOP, "true")])
        .await;
    let token = harness
        .server
        .mock("POST", "/token")
        .expect(0)
        .create_async()
        .await;
    let before = harness.record("xyz").await;

    let err = harness
        .refresher
        .refresh("xyz", Some("rt-9"), None)
        .await
        .expect_err("dpop key required");

    assert!(matches!(err, AuthError::MissingDpopKey { .. }));
    assert!(err.to_string().contains("[xyz]"));
    assert_eq!(harness.record("xyz").await, before);
    token.assert_async().await;
    discovery.assert_async().await;
}

#[tokio::test]
async fn missing_refresh_token_makes_no_requests() {
    let mut harness = Harness::new().await;
    let discovery = harness.discovery_expecting(false, Some(0)).await;
    harness.seed("abc", &[]).await;

    let err = harness
        .refresher
        .refresh("abc", None, None)
        .await
        .expect_err("no refresh token");

    assert!(matches!(err, AuthError::MissingRefreshToken { .. }));
    assert!(err.to_string().contains("[abc]"));
    discovery.assert_async().await;
}

#[tokio::test]
async fn response_without_access_token_keeps_stored_token() {
    let mut harness = Harness::new().await;
    let _discovery = harness.discovery(false).await;
    harness.seed("abc", &[(REFRESH_TOKEN, "rt-1")]).await;
    let _mock = harness
        .server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(json!({ "refresh_token": "rt-2", "token_type": "Bearer" }).to_string())
        .create_async()
        .await;

    let err = harness
        .refresher
        .refresh("abc", Some("rt-1"), None)
        .await
        .expect_err("no access token");

    match &err {
        AuthError::InvalidTokenResponse { session_id, issuer } => {
            assert_eq!(session_id, "abc");
            assert_eq!(issuer, &harness.issuer());
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(harness.stored_refresh_token("abc").await.as_deref(), Some("rt-1"));
}

#[tokio::test]
async fn non_rotating_grant_leaves_refresh_token_alone() {
    let mut harness = Harness::new().await;
    let _discovery = harness.discovery(false).await;
    harness.seed("abc", &[(REFRESH_TOKEN, "rt-1")]).await;
    let _mock = harness
        .server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(json!({ "access_token": "at-1", "token_type": "Bearer" }).to_string())
        .create_async()
        .await;

    let tokens = harness
        .refresher
        .refresh("abc", Some("rt-1"), None)
        .await
        .expect("refresh");

    assert!(tokens.refresh_token.is_none());
    assert!(tokens.expires_at.is_none());
    assert_eq!(harness.stored_refresh_token("abc").await.as_deref(), Some("rt-1"));
}

#[tokio::test]
async fn token_endpoint_failure_keeps_session_intact() {
    let mut harness = Harness::new().await;
    let _discovery = harness.discovery(false).await;
    harness.seed("abc", &[(REFRESH_TOKEN, "rt-1")]).await;
    let _mock = harness
        .server
        .mock("POST", "/token")
        .with_status(503)
        .with_body("upstream unavailable")
        .create_async()
        .await;
    let before = harness.record("abc").await;

    let err = harness
        .refresher
        .refresh("abc", Some("rt-1"), None)
        .await
        .expect_err("server error");

    assert!(matches!(err, AuthError::TokenEndpoint { .. }));
    assert!(err.to_string().contains("503"));
    assert!(!err.to_string().contains("rt-1"));
    assert_eq!(harness.record("abc").await, before);
}

#[tokio::test]
async fn dpop_session_sends_proof_header() {
    let mut harness = Harness::new().await;
    let _discovery = harness.discovery(false).await;
    harness
        .seed("xyz", &[(REFRESH_TOKEN, "rt-9"), (DPOP, "true")])
        .await;
    let token = harness
        .server
        .mock("POST", "/token")
        .match_header("dpop", Matcher::Regex("^proof\\.POST\\.".into()))
        .with_status(200)
        .with_body(
            json!({ "access_token": "at-9", "token_type": "DPoP", "expires_in": 300 }).to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let tokens = harness
        .refresher
        .refresh("xyz", Some("rt-9"), Some(&TestKey))
        .await
        .expect("refresh");

    assert_eq!(tokens.token_type.as_deref(), Some("DPoP"));
    token.assert_async().await;
}

#[tokio::test]
async fn unregistered_session_registers_then_refreshes() {
    let mut harness = Harness::new().await;
    let _discovery = harness.discovery(true).await;
    let issuer = harness.issuer();
    harness
        .storage
        .set_for_user("new", &[(ISSUER, issuer.as_str()), (REFRESH_TOKEN, "rt-1")])
        .await
        .expect("seed");
    let register = harness
        .server
        .mock("POST", "/register")
        .with_status(201)
        .with_body(json!({ "client_id": "dyn-1", "client_secret": "dyn-secret" }).to_string())
        .expect(1)
        .create_async()
        .await;
    let _mock = harness
        .server
        .mock("POST", "/token")
        .with_status(200)
        .with_body(json!({ "access_token": "at-1" }).to_string())
        .expect(2)
        .create_async()
        .await;

    harness
        .refresher
        .refresh("new", Some("rt-1"), None)
        .await
        .expect("first refresh");
    harness
        .refresher
        .refresh("new", Some("rt-1"), None)
        .await
        .expect("second refresh");

    let record = harness.record("new").await;
    assert_eq!(record.get(CLIENT_ID).map(String::as_str), Some("dyn-1"));
    assert_eq!(record.get(CLIENT_TYPE).map(String::as_str), Some("dynamic"));
    register.assert_async().await;
}

#[tokio::test]
async fn concurrent_sessions_refresh_independently() {
    let mut harness = Harness::new().await;
    let _discovery = harness.discovery(false).await;
    harness.seed("a", &[(REFRESH_TOKEN, "rt-a")]).await;
    harness.seed("b", &[(REFRESH_TOKEN, "rt-b")]).await;
    let mut token_mocks = Vec::new();
    for name in ["a", "b"] {
        let mock = harness
            .server
            .mock("POST", "/token")
            .match_body(Matcher::UrlEncoded(
                "refresh_token".into(),
                format!("rt-{name}"),
            ))
            .with_status(200)
            .with_body(
                json!({ "access_token": format!("at-{name}"), "refresh_token": format!("rt-{name}2") })
                    .to_string(),
            )
            .create_async()
            .await;
        token_mocks.push(mock);
    }

    let (a, b) = tokio::join!(
        harness.refresher.refresh("a", Some("rt-a"), None),
        harness.refresher.refresh("b", Some("rt-b"), None),
    );

    assert_eq!(a.expect("a").access_token.expose(), "at-a");
    assert_eq!(b.expect("b").access_token.expose(), "at-b");
    assert_eq!(harness.stored_refresh_token("a").await.as_deref(), Some("rt-a2"));
    assert_eq!(harness.stored_refresh_token("b").await.as_deref(), Some("rt-b2"));
}

#[tokio::test]
async fn racing_refreshes_of_one_session_keep_a_rotated_token() {
    let mut harness = Harness::new().await;
    let _discovery = harness.discovery(false).await;
    harness.seed("abc", &[(REFRESH_TOKEN, "rt-1")]).await;
    let issued = Arc::new(AtomicUsize::new(0));
    let counter = issued.clone();
    let token = harness
        .server
        .mock("POST", "/token")
        .match_body(Matcher::UrlEncoded("refresh_token".into(), "rt-1".into()))
        .with_status(200)
        .with_body_from_request(move |_request| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 2;
            json!({ "access_token": format!("at-{n}"), "refresh_token": format!("rt-{n}") })
                .to_string()
                .into_bytes()
        })
        .expect(2)
        .create_async()
        .await;

    let (first, second) = tokio::join!(
        harness.refresher.refresh("abc", Some("rt-1"), None),
        harness.refresher.refresh("abc", Some("rt-1"), None),
    );

    first.expect("first refresh");
    second.expect("second refresh");
    let stored = harness.stored_refresh_token("abc").await;
    assert!(
        matches!(stored.as_deref(), Some("rt-2" | "rt-3")),
        "stored refresh token was {stored:?}"
    );
    assert_eq!(issued.load(Ordering::SeqCst), 2);
    token.assert_async().await;
}

#[tokio::test]
async fn unresponsive_token_endpoint_times_out() {
    let silent = TcpListener::bind("127.0.0.1:0").expect("bind");
    let silent_url = format!("http://{}", silent.local_addr().expect("addr"));
    let mut harness =
        Harness::with_http(default_http_client(Duration::from_millis(200), false)).await;
    let issuer = harness.issuer();
    let _discovery = harness
        .server
        .mock("GET", "/.well-known/openid-configuration")
        .with_status(200)
        .with_body(
            json!({
                "issuer": issuer,
                "authorization_endpoint": format!("{issuer}/auth"),
                "token_endpoint": format!("{silent_url}/token"),
                "jwks_uri": format!("{issuer}/jwks")
            })
            .to_string(),
        )
        .create_async()
        .await;
    harness.seed("abc", &[(REFRESH_TOKEN, "rt-1")]).await;
    let before = harness.record("abc").await;

    let err = harness
        .refresher
        .refresh("abc", Some("rt-1"), None)
        .await
        .expect_err("timed out");

    assert!(matches!(err, AuthError::TokenEndpoint { .. }));
    assert!(!err.to_string().contains("rt-1"));
    assert_eq!(harness.record("abc").await, before);
    drop(silent);
}

#[tokio::test]
async fn failing_dpop_signer_sends_nothing() {
    let mut harness = Harness::new().await;
    let _discovery = harness.discovery(false).await;
    harness
        .seed("xyz", &[(REFRESH_TOKEN, "rt-9"), (DPOP, "true")])
        .await;
    let token = harness
        .server
        .mock("POST", "/token")
        .expect(0)
        .create_async()
        .await;
    let before = harness.record("xyz").await;

    let err = harness
        .refresher
        .refresh("xyz", Some("rt-9"), Some(&UnavailableKey))
        .await
        .expect_err("signer failed");

    assert!(matches!(err, AuthError::DpopProof { .. }));
    assert!(err.to_string().contains("[xyz]"));
    assert_eq!(harness.record("xyz").await, before);
    token.assert_async().await;
}

#[tokio::test]
async fn rejected_login_leaves_session_logged_out() {
    let mut server = Server::new_async().await;
    let issuer = server.url();
    let _discovery = server
        .mock("GET", "/.well-known/openid-configuration")
        .with_status(200)
        .with_body(
            json!({
                "issuer": issuer,
                "authorization_endpoint": format!("{issuer}/auth"),
                "token_endpoint": format!("{issuer}/token"),
                "jwks_uri": format!("{issuer}/jwks")
            })
            .to_string(),
        )
        .create_async()
        .await;
    let _token = server
        .mock("POST", "/token")
        .with_status(400)
        .with_body(json!({ "error": "invalid_grant" }).to_string())
        .create_async()
        .await;

    let auth = build_client_authentication(
        Arc::new(InMemoryStorage::new()),
        reqwest::Client::new(),
        ClientOptions::default(),
    );
    let err = auth
        .login(
            &LoginOptions {
                session_id: "abc".to_string(),
                oidc_issuer: Some(issuer.clone()),
                client_id: Some("public-app".to_string()),
                refresh_token: Some(Secret::new("rt-revoked")),
                ..LoginOptions::default()
            },
            None,
        )
        .await
        .expect_err("grant rejected");

    assert!(matches!(err, AuthError::TokenEndpoint { .. }));
    assert!(auth.storage().get_for_user("abc").await.expect("read").is_none());
    assert!(!auth.session_info("abc").await.expect("info").is_logged_in);
}

#[tokio::test]
async fn login_then_access_token_uses_cache() {
    let mut server = Server::new_async().await;
    let issuer = server.url();
    let _mock = server
        .mock("GET", "/.well-known/openid-configuration")
        .with_status(200)
        .with_body(
            json!({
                "issuer": issuer,
                "authorization_endpoint": format!("{issuer}/auth"),
                "token_endpoint": format!("{issuer}/token"),
                "jwks_uri": format!("{issuer}/jwks")
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;
    let token = server
        .mock("POST", "/token")
        .match_body(Matcher::UrlEncoded("client_id".into(), "public-app".into()))
        .with_status(200)
        .with_body(
            json!({ "access_token": "at-1", "refresh_token": "rt-2", "expires_in": 3600 })
                .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let auth = build_client_authentication(
        Arc::new(InMemoryStorage::new()),
        reqwest::Client::new(),
        ClientOptions::default(),
    );
    let info = auth
        .login(
            &LoginOptions {
                session_id: "abc".to_string(),
                oidc_issuer: Some(issuer.clone()),
                client_id: Some("public-app".to_string()),
                refresh_token: Some(Secret::new("rt-1")),
                ..LoginOptions::default()
            },
            None,
        )
        .await
        .expect("login");
    assert!(info.is_logged_in);
    assert!(info.expiration_date.is_some());

    let access_token = auth.access_token("abc", None).await.expect("cached");
    assert_eq!(access_token.expose(), "at-1");
    assert_eq!(
        auth.storage()
            .get_for_user_key("abc", REFRESH_TOKEN)
            .await
            .expect("read")
            .as_deref(),
        Some("rt-2")
    );
    token.assert_async().await;
}
