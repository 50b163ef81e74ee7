//! Failed-attempt gate in front of `POST /login`.

use super::handlers::client_address;
use crate::auth::{AbuseGuard, AuthError};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, info};

/// Requests carrying this header with the configured value skip the gate.
pub const BYPASS_HEADER: &str = "x-pretty-please";

pub const DEFAULT_BYPASS_VALUE: &str = "dont_ban";

#[derive(Clone)]
pub struct Gate {
    guard: Arc<AbuseGuard>,
    bypass_value: Arc<str>,
}

impl Gate {
    #[must_use]
    pub fn new(guard: Arc<AbuseGuard>, bypass_value: &str) -> Self {
        Self {
            guard,
            bypass_value: Arc::from(bypass_value),
        }
    }

    fn bypassed(&self, request: &Request) -> bool {
        request
            .headers()
            .get(BYPASS_HEADER)
            .is_some_and(|value| value.as_bytes() == self.bypass_value.as_bytes())
    }
}

/// Refuse banned addresses and count client errors against the caller.
pub async fn abuse_gate(State(gate): State<Gate>, request: Request, next: Next) -> Response {
    if gate.bypassed(&request) {
        debug!("Abuse gate bypassed");
        return next.run(request).await;
    }

    let address = client_address(request.extensions());

    if gate.guard.is_banned(&address).await {
        info!(address, "Refusing banned address");
        return AuthError::Banned.into_response();
    }

    let response = next.run(request).await;

    if matches!(
        response.status(),
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED
    ) {
        gate.guard.record_failure(&address).await;
    }

    response
}
