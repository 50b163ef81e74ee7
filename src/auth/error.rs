use super::{identity::IdentityError, token::TokenError};
use axum::http::StatusCode;
use thiserror::Error;

/// Login outcomes other than success.
///
/// Status, code and reason are part of the client contract; clients branch
/// on the numeric code.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("API Key Invalid")]
    InvalidApiKey,
    #[error("Password is a required field")]
    MissingPassword,
    #[error("Bearer Token Invalid")]
    MalformedBearer,
    #[error("Bearer Token Invalid")]
    InvalidBearer,
    #[error("The username or password provided is incorrect")]
    InvalidCredentials,
    #[error("The username associated with this token could not be found")]
    UnknownTokenOwner,
    #[error("Refresh token invalid")]
    RefreshTokenInvalid,
    #[error("Refresh token expired")]
    RefreshTokenExpired,
    #[error("Bearer token expired")]
    BearerTokenExpired,
    #[error("Too many failed attempts")]
    Banned,
    #[error("Could not provision OAuth")]
    Provisioning(#[source] TokenError),
    #[error("Internal server error")]
    Session(#[source] TokenError),
    #[error("Internal server error")]
    Identity(#[from] IdentityError),
}

impl AuthError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidApiKey | Self::MissingPassword | Self::MalformedBearer => {
                StatusCode::BAD_REQUEST
            }
            Self::InvalidBearer | Self::InvalidCredentials | Self::UnknownTokenOwner => {
                StatusCode::UNAUTHORIZED
            }
            Self::RefreshTokenInvalid
            | Self::RefreshTokenExpired
            | Self::BearerTokenExpired
            | Self::Banned => StatusCode::FORBIDDEN,
            Self::Provisioning(_) | Self::Session(_) | Self::Identity(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::MissingPassword => 1000,
            Self::InvalidApiKey | Self::MalformedBearer | Self::InvalidBearer => 1001,
            Self::Provisioning(_) => 1009,
            Self::Session(_) | Self::Identity(_) => 1010,
            Self::Banned => 1099,
            Self::InvalidCredentials | Self::UnknownTokenOwner => 1100,
            Self::RefreshTokenInvalid => 1101,
            Self::RefreshTokenExpired => 1102,
            Self::BearerTokenExpired => 1105,
        }
    }

    #[must_use]
    pub fn reason(&self) -> String {
        self.to_string()
    }
}
