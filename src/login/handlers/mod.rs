pub mod health;
pub use self::health::{health, ping};

pub mod login;
pub use self::login::login;

// common functions for the handlers
use crate::auth::AuthError;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Extensions, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};
use tracing::error;
use utoipa::ToSchema;

/// Error body returned for every refused request.
#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct ErrorResponse {
    pub code: u16,
    pub reason: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            match std::error::Error::source(&self) {
                Some(source) => error!("{self}: {source}"),
                None => error!("{self}"),
            }
        }

        let body = ErrorResponse {
            code: self.code(),
            reason: self.reason(),
        };

        (status, Json(body)).into_response()
    }
}

/// Peers whose `X-Forwarded-For` and `X-Real-IP` headers are believed.
///
/// Requests from any other peer are attributed to the peer itself, whatever
/// headers they carry.
#[derive(Clone, Debug, Default)]
pub struct TrustedProxies(Arc<HashSet<IpAddr>>);

impl TrustedProxies {
    pub fn new<I>(proxies: I) -> Self
    where
        I: IntoIterator<Item = IpAddr>,
    {
        Self(Arc::new(proxies.into_iter().collect()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn trusts(&self, address: IpAddr) -> bool {
        self.0.contains(&address)
    }

    /// Source address of a request arriving from `peer`.
    ///
    /// Behind a trusted proxy this is the right-most `X-Forwarded-For` hop that
    /// is not itself a trusted proxy, then `X-Real-IP`, then the peer.
    #[must_use]
    pub fn resolve(&self, headers: &HeaderMap, peer: Option<IpAddr>) -> String {
        let Some(peer) = peer else {
            return "unknown".to_string();
        };
        if !self.trusts(peer) {
            return peer.to_string();
        }

        if let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
        {
            let hops: Vec<&str> = forwarded
                .split(',')
                .map(str::trim)
                .filter(|hop| !hop.is_empty())
                .collect();
            let client = hops
                .iter()
                .rev()
                .find(|hop| !hop.parse::<IpAddr>().is_ok_and(|ip| self.trusts(ip)))
                .or_else(|| hops.first());
            if let Some(client) = client {
                return (*client).to_string();
            }
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        if let Some(address) = real_ip {
            return address.to_string();
        }

        peer.to_string()
    }
}

/// Source address resolved once per request by [`resolve_client`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientAddress(pub String);

/// Resolve the caller's address and store it as a [`ClientAddress`] extension.
pub async fn resolve_client(
    State(proxies): State<TrustedProxies>,
    mut request: Request,
    next: Next,
) -> Response {
    let address = proxies.resolve(request.headers(), peer_address(request.extensions()));
    request.extensions_mut().insert(ClientAddress(address));
    next.run(request).await
}

fn peer_address(extensions: &Extensions) -> Option<IpAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
}

/// Address requests are attributed to: the resolved [`ClientAddress`], or the
/// socket peer when no resolver ran.
pub(crate) fn client_address(extensions: &Extensions) -> String {
    if let Some(ClientAddress(address)) = extensions.get::<ClientAddress>() {
        return address.clone();
    }
    peer_address(extensions).map_or_else(|| "unknown".to_string(), |ip| ip.to_string())
}
