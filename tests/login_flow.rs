use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    http::{request::Builder, Request, StatusCode},
    Router,
};
use login_api::{
    auth::{
        identity::IdentityError, password::ntlm_hash, token::epoch_now, AbuseGuard, ApiKeys,
        Authenticator, BanPolicy, Identity, IdentityStore, MemoryStore, TokenConfig,
        TokenManager,
    },
    login::{audit::TracingAuditSink, gate::Gate, handlers::TrustedProxies, router, AppState},
};
use serde_json::{json, Value};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};
use tower::ServiceExt;

const API_KEY: &str = "5f2b8e0c9a7d4e1f";
const ACCESS_TTL: i64 = 600;
const CLIENT: &str = "198.51.100.23";
const PROXY: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

struct Accounts(Vec<Identity>);

#[async_trait]
impl IdentityStore for Accounts {
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>, IdentityError> {
        Ok(self
            .0
            .iter()
            .find(|identity| identity.username == username)
            .cloned())
    }
}

fn app() -> Router {
    let store = Arc::new(MemoryStore::new());
    let tokens = TokenManager::new(
        store.clone(),
        TokenConfig::new("TEST")
            .with_access_ttl_seconds(ACCESS_TTL)
            .with_refresh_ttl_seconds(3_600),
    );
    let accounts = Accounts(vec![Identity {
        username: "carol".to_string(),
        password: ntlm_hash("correct horse"),
        email: "carol@example.com".to_string(),
        tier: 60,
        status: 1,
        next_cycle: 1_900_000_000,
        customer_id: 7,
    }]);

    router(AppState {
        authenticator: Arc::new(Authenticator::new(
            Arc::new(accounts),
            tokens,
            ApiKeys::new([("android", API_KEY)]),
        )),
        gate: Gate::new(
            Arc::new(AbuseGuard::new(store, BanPolicy::default(), "TEST")),
            "dont_ban",
        ),
        audit: Arc::new(TracingAuditSink),
        trusted_proxies: TrustedProxies::new([PROXY]),
    })
}

/// A `POST /login` relayed by the trusted proxy on behalf of `client`.
fn via_proxy(client: &str) -> Builder {
    Request::builder()
        .method("POST")
        .uri("/login")
        .header("x-forwarded-for", client)
        .extension(ConnectInfo(SocketAddr::new(PROXY, 44321)))
}

async fn post_login(app: &Router, body: Value, authorization: Option<&str>) -> (StatusCode, Value) {
    let mut request = via_proxy(CLIENT).header("content-type", "application/json");
    if let Some(value) = authorization {
        request = request.header("authorization", value);
    }

    let response = app
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn credentials(password: &str) -> Value {
    json!({"api_key": API_KEY, "username": "carol", "password": password})
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let app = app();
    let (status, body) = post_login(&app, credentials("battery staple"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 1100);
    assert_eq!(
        body["reason"],
        "The username or password provided is incorrect"
    );
}

#[tokio::test]
async fn correct_credentials_issue_a_session() {
    let app = app();
    let (status, body) = post_login(&app, credentials("correct horse"), None).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(body["email"], "carol@example.com");
    assert_eq!(body["account_type"], 1);
    assert_eq!(body["sub_end_epoch"], 1_900_000_000_i64);
    assert!(!body["access_token"].as_str().unwrap_or_default().is_empty());
    assert!(!body["refresh_token"].as_str().unwrap_or_default().is_empty());

    let expires = body["access_expire_epoch"].as_i64().unwrap_or_default();
    assert!((expires - (epoch_now() + ACCESS_TTL)).abs() <= 5, "{expires}");
}

#[tokio::test]
async fn missing_api_key_is_rejected() {
    let app = app();
    let (status, body) = post_login(
        &app,
        json!({"username": "carol", "password": "correct horse"}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], 1001);
}

#[tokio::test]
async fn unparsable_body_is_rejected() {
    let app = app();
    let response = app
        .oneshot(
            via_proxy(CLIENT)
                .body(Body::from("api_key=x"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, json!({"code": 1001, "reason": "API Key Invalid"}));
}

#[tokio::test]
async fn bearer_refresh_rotates_tokens() {
    let app = app();
    let (_, first) = post_login(&app, credentials("correct horse"), None).await;
    let access = first["access_token"].as_str().unwrap_or_default().to_string();
    let refresh = first["refresh_token"].as_str().unwrap_or_default().to_string();
    let bearer = format!("Bearer {access}");

    let (status, body) = post_login(&app, json!({"refresh_token": "stale"}), Some(&bearer)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], 1101);

    let (status, second) =
        post_login(&app, json!({"refresh_token": &refresh}), Some(&bearer)).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(second["access_token"], first["access_token"]);
    assert_ne!(second["refresh_token"], first["refresh_token"]);

    // The old access token is gone after rotation.
    let (status, body) = post_login(&app, json!({"refresh_token": &refresh}), Some(&bearer)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], 1001);
}

#[tokio::test]
async fn null_bearer_uses_credentials() {
    let app = app();
    let (status, _) = post_login(&app, credentials("correct horse"), Some("Bearer null")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn repeated_failures_ban_the_address() {
    let app = app();

    for attempt in 1..=10 {
        let (status, body) = post_login(&app, credentials("wrong"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "attempt {attempt}");
        assert_eq!(body["code"], 1100);
    }

    // Even correct credentials are refused once banned.
    let (status, body) = post_login(&app, credentials("correct horse"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({"code": 1099, "reason": "Too many failed attempts"}));
}

#[tokio::test]
async fn bypass_header_skips_the_ban() {
    let app = app();
    for _ in 0..10 {
        post_login(&app, credentials("wrong"), None).await;
    }

    let response = app
        .clone()
        .oneshot(
            via_proxy(CLIENT)
                .header("X-PRETTY-PLEASE", "dont_ban")
                .body(Body::from(credentials("correct horse").to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn allow_listed_address_is_never_banned() {
    let app = app();
    for _ in 0..12 {
        let response = app
            .clone()
            .oneshot(
                via_proxy("127.0.0.1")
                    .body(Body::from(credentials("wrong").to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn forged_forwarded_for_does_not_escape_the_ban() {
    let app = app();
    let stranger = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 44)), 51000);

    let mut statuses = Vec::new();
    for attempt in 0..12 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/login")
                    .header("x-forwarded-for", format!("127.0.0.{attempt}"))
                    .extension(ConnectInfo(stranger))
                    .body(Body::from(credentials("wrong").to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        statuses.push(response.status());
    }

    assert!(statuses[..10].iter().all(|status| *status == StatusCode::UNAUTHORIZED));
    assert_eq!(statuses[10..], [StatusCode::FORBIDDEN, StatusCode::FORBIDDEN]);
}

#[tokio::test]
async fn health_and_ping() {
    let app = app();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(serde_json::from_slice::<Value>(&bytes).unwrap(), json!({"pong": true}));

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
}
