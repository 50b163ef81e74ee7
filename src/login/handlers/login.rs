use super::ErrorResponse;
use crate::auth::{AuthError, Authenticator, LoginAttempt, LoginRequest, LoginSuccess};
use axum::{
    body::Bytes,
    extract::Extension,
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub email: String,
    /// 0 free, 1 trial, 2 standard, 3 inactive
    pub account_type: u8,
    pub sub_end_epoch: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub access_expire_epoch: i64,
}

impl From<LoginSuccess> for LoginResponse {
    fn from(success: LoginSuccess) -> Self {
        Self {
            email: success.email,
            account_type: success.classification.account_type.into(),
            sub_end_epoch: success.classification.sub_end_epoch,
            access_token: success.token.access_token,
            refresh_token: success.token.refresh_token,
            access_expire_epoch: success.token.access_expires_at,
        }
    }
}

#[utoipa::path(
    post,
    path= "/login",
    request_body = LoginRequest,
    params(
        ("Authorization" = Option<String>, Header, description = "Bearer <access_token> to renew a session"),
    ),
    responses (
        (status = 200, description = "Session issued", body = LoginResponse, content_type = "application/json"),
        (status = 400, description = "Invalid API key, missing field or malformed bearer", body = ErrorResponse),
        (status = 401, description = "Unknown bearer token or wrong credentials", body = ErrorResponse),
        (status = 403, description = "Refresh refused, token expired or address banned", body = ErrorResponse),
        (status = 500, description = "Session store or account database unavailable", body = ErrorResponse),
    ),
    tag= "login"
)]
// axum handler for login
#[instrument(skip_all)]
pub async fn login(
    authenticator: Extension<Arc<Authenticator>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<LoginResponse>, AuthError> {
    let request: LoginRequest = serde_json::from_slice(&body).map_err(|err| {
        debug!("Unparsable login body: {err}");
        AuthError::InvalidApiKey
    })?;

    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let success = authenticator
        .authenticate(LoginAttempt::classify(authorization, &request))
        .await?;

    Ok(Json(success.into()))
}
