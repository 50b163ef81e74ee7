//! Request audit trail.
//!
//! Every request handled by the router produces one [`AuditEvent`] once its
//! response is known. Events go to an [`AuditSink`]; the default sink logs them
//! through `tracing` under the `audit` target, and [`FileAuditSink`] appends
//! JSON lines to a file from a background task so the request path never waits
//! on disk.
//!
//! Passwords never reach the sink: a `password` field in a JSON body is
//! replaced by `true`.

use super::handlers::client_address;
use axum::{
    body::{to_bytes, Body, Bytes},
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderMap, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use std::{path::Path, sync::Arc};
use tokio::{fs::OpenOptions, io::AsyncWriteExt, sync::mpsc};
use tracing::{error, info, warn};

/// Largest request or response body the audit layer buffers.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Events the file writer may hold before new ones are dropped.
pub const FILE_QUEUE_CAPACITY: usize = 1024;

const INVALID_JSON: &str = "Invalid JSON";

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub ip_address: String,
    pub content_type: Option<String>,
    pub endpoint: String,
    pub method: String,
    /// Decoded query pairs in request order, repeated keys included.
    pub query_params: Vec<(String, String)>,
    pub authorization_header: Option<String>,
    pub body: Value,
    pub response_body: Value,
    pub response_code: u16,
}

/// Destination for audit events. Implementations must not block.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

#[derive(Clone, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => info!(target: "audit", "{line}"),
            Err(err) => error!("Failed to serialize audit event: {err}"),
        }
    }
}

/// Appends one JSON document per line to a file.
#[derive(Clone, Debug)]
pub struct FileAuditSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl FileAuditSink {
    /// Open `path` for appending and spawn the writer task.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or created.
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        let (tx, mut rx) = mpsc::channel::<AuditEvent>(FILE_QUEUE_CAPACITY);
        let log_path = path.display().to_string();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let mut line = match serde_json::to_vec(&event) {
                    Ok(line) => line,
                    Err(err) => {
                        error!("Failed to serialize audit event: {err}");
                        continue;
                    }
                };
                line.push(b'\n');

                if let Err(err) = file.write_all(&line).await {
                    error!("Failed to write audit log {log_path}: {err}");
                    continue;
                }
                if let Err(err) = file.flush().await {
                    error!("Failed to flush audit log {log_path}: {err}");
                }
            }
        });

        Ok(Self { tx })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Audit queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Audit writer stopped, dropping event");
            }
        }
    }
}

/// Request body as recorded: JSON with the password masked, or a marker when
/// the body is not JSON. An empty body is recorded as `null`.
#[must_use]
pub fn redact_body(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(mut value) => {
            if let Some(password) = value.as_object_mut().and_then(|map| map.get_mut("password")) {
                *password = Value::Bool(true);
            }
            value
        }
        Err(_) => Value::String(INVALID_JSON.to_string()),
    }
}

fn response_value(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

fn header_string(headers: &HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Buffer request and response, then hand an [`AuditEvent`] to the sink.
pub async fn audit(
    State(sink): State<Arc<dyn AuditSink>>,
    request: Request,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();

    let Ok(body) = to_bytes(body, MAX_BODY_BYTES).await else {
        return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    };

    let query_params: Vec<(String, String)> = parts
        .uri
        .query()
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();

    let mut event = AuditEvent {
        ip_address: client_address(&parts.extensions),
        content_type: header_string(&parts.headers, CONTENT_TYPE),
        endpoint: parts.uri.path().to_string(),
        method: parts.method.to_string(),
        query_params,
        authorization_header: header_string(&parts.headers, AUTHORIZATION),
        body: redact_body(&body),
        response_body: Value::Null,
        response_code: 0,
    };

    let response = next
        .run(Request::from_parts(parts, Body::from(body)))
        .await;

    let (parts, body) = response.into_parts();
    let body: Bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            error!("Failed to buffer response body: {err}");
            event.response_code = StatusCode::INTERNAL_SERVER_ERROR.as_u16();
            sink.record(event);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    event.response_code = parts.status.as_u16();
    event.response_body = response_value(&body);
    sink.record(event);

    Response::from_parts(parts, Body::from(body))
}
