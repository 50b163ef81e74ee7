//! HTTP surface: routes, middleware and the server loop.

use crate::auth::{
    store, AbuseGuard, ApiKeys, Authenticator, BanPolicy, PgIdentityStore, TokenConfig,
    TokenManager,
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware,
    routing::{get, post},
    Extension, Router,
};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

pub mod audit;
pub mod gate;
pub mod handlers;
mod openapi;

pub use openapi::openapi;

use audit::{AuditSink, FileAuditSink, TracingAuditSink};
use gate::Gate;
use handlers::TrustedProxies;

/// Everything the router needs, already connected.
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub gate: Gate,
    pub audit: Arc<dyn AuditSink>,
    pub trusted_proxies: TrustedProxies,
}

/// Build the application router.
///
/// The abuse gate wraps `/login` only; the audit layer sees every route. Both
/// attribute requests to the address resolved from `trusted_proxies`.
pub fn router(state: AppState) -> Router {
    let login = Router::new()
        .route("/login", post(handlers::login))
        .route_layer(middleware::from_fn_with_state(state.gate, gate::abuse_gate));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ping", get(handlers::ping))
        .merge(login)
        .layer(middleware::from_fn_with_state(state.audit, audit::audit))
        .layer(middleware::from_fn_with_state(
            state.trusted_proxies,
            handlers::resolve_client,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state.authenticator)),
        )
}

/// Server settings resolved from the command line.
#[derive(Debug)]
pub struct Settings {
    pub port: u16,
    pub dsn: SecretString,
    pub redis_url: SecretString,
    pub key_prefix: String,
    pub tokens: TokenConfig,
    pub ban_policy: BanPolicy,
    pub api_keys: ApiKeys,
    pub bypass_value: String,
    pub trusted_proxies: TrustedProxies,
    pub audit_log: Option<PathBuf>,
}

/// Start the server
/// # Errors
/// Return error if a backing store is unreachable or the listener fails
pub async fn new(settings: Settings) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(settings.dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    let kv = store::connect(settings.redis_url.expose_secret())
        .await
        .context("Failed to connect to key-value store")?;

    let authenticator = Arc::new(Authenticator::new(
        Arc::new(PgIdentityStore::new(pool)),
        TokenManager::new(kv.clone(), settings.tokens),
        settings.api_keys,
    ));

    let guard = Arc::new(AbuseGuard::new(kv, settings.ban_policy, &settings.key_prefix));

    let audit: Arc<dyn AuditSink> = match &settings.audit_log {
        Some(path) => Arc::new(
            FileAuditSink::open(path)
                .await
                .with_context(|| format!("Failed to open audit log {}", path.display()))?,
        ),
        None => Arc::new(TracingAuditSink),
    };

    let app = router(AppState {
        authenticator,
        gate: Gate::new(guard, &settings.bypass_value),
        audit,
        trusted_proxies: settings.trusted_proxies,
    });

    let listener = TcpListener::bind(format!("::0:{}", settings.port)).await?;

    info!("Listening on [::]:{}", settings.port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{identity::IdentityError, Identity, IdentityStore, MemoryStore};
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    struct NoAccounts;

    #[async_trait]
    impl IdentityStore for NoAccounts {
        async fn find_by_username(&self, _: &str) -> Result<Option<Identity>, IdentityError> {
            Ok(None)
        }
    }

    fn app() -> Router {
        let kv = Arc::new(MemoryStore::new());
        let authenticator = Arc::new(Authenticator::new(
            Arc::new(NoAccounts),
            TokenManager::new(kv.clone(), TokenConfig::new("TEST")),
            ApiKeys::new([("web", "key")]),
        ));
        let guard = Arc::new(AbuseGuard::new(kv, BanPolicy::default(), "TEST"));
        router(AppState {
            authenticator,
            gate: Gate::new(guard, gate::DEFAULT_BYPASS_VALUE),
            audit: Arc::new(TracingAuditSink),
            trusted_proxies: TrustedProxies::default(),
        })
    }

    #[tokio::test]
    async fn health_is_served_with_request_id() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert!(response.headers().contains_key("x-app"));
    }

    #[tokio::test]
    async fn request_id_is_propagated() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/ping")
                    .header("x-request-id", "abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok()),
            Some("abc")
        );
    }

    #[tokio::test]
    async fn login_rejects_get() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/login")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
