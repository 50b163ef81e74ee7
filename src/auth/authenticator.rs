//! Login orchestration.
//!
//! A request carrying a bearer token renews its session; any other request
//! must present an API key and username/password. Every outcome maps to one
//! [`AuthError`] variant or a [`LoginSuccess`].

use super::{
    account::{classify, Classification},
    error::AuthError,
    identity::{Identity, IdentityStore},
    password,
    token::{epoch_now, SessionToken, TokenError, TokenManager},
};
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

/// `Authorization` value some clients send when they hold no token.
const NULL_BEARER: &str = "Bearer null";

/// Issued API keys, each labelled by client platform.
#[derive(Clone, Debug, Default)]
pub struct ApiKeys {
    platforms: HashMap<String, String>,
}

impl ApiKeys {
    pub fn new<I, P, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, K)>,
        P: Into<String>,
        K: Into<String>,
    {
        Self {
            platforms: entries
                .into_iter()
                .map(|(platform, key)| (key.into(), platform.into()))
                .collect(),
        }
    }

    /// Parse `platform=key` pairs separated by commas.
    ///
    /// # Errors
    /// Returns a message naming the first malformed pair.
    pub fn parse(value: &str) -> Result<Self, String> {
        let mut entries = Vec::new();
        for pair in value.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
            let (platform, key) = pair
                .split_once('=')
                .map(|(platform, key)| (platform.trim(), key.trim()))
                .filter(|(platform, key)| !platform.is_empty() && !key.is_empty())
                .ok_or_else(|| format!("invalid API key entry: {pair}"))?;
            entries.push((platform.to_string(), key.to_string()));
        }

        if entries.is_empty() {
            return Err("at least one API key is required".to_string());
        }

        Ok(Self::new(entries))
    }

    /// Platform label of `key`, if it is an issued key.
    #[must_use]
    pub fn platform(&self, key: &str) -> Option<&str> {
        self.platforms.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.platforms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty()
    }
}

/// Body of `POST /login`. Every field is optional on the wire.
#[derive(ToSchema, Deserialize, Debug, Default)]
#[serde(default)]
pub struct LoginRequest {
    pub api_key: String,
    pub username: String,
    pub password: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Copy)]
pub enum LoginAttempt<'a> {
    Bearer {
        authorization: &'a str,
        refresh_token: &'a str,
    },
    Credentials {
        api_key: &'a str,
        username: &'a str,
        password: &'a str,
    },
}

impl<'a> LoginAttempt<'a> {
    /// Pick the flow: an `Authorization` header other than empty or
    /// `Bearer null` selects the bearer flow.
    #[must_use]
    pub fn classify(authorization: Option<&'a str>, request: &'a LoginRequest) -> Self {
        match authorization.map(str::trim) {
            Some(value) if !value.is_empty() && value != NULL_BEARER => Self::Bearer {
                authorization: value,
                refresh_token: &request.refresh_token,
            },
            _ => Self::Credentials {
                api_key: &request.api_key,
                username: &request.username,
                password: &request.password,
            },
        }
    }
}

/// Token from a `Bearer <token>` header value.
fn bearer_token(authorization: &str) -> Option<&str> {
    let mut fields = authorization.split_whitespace();
    let scheme = fields.next()?;
    let token = fields.next()?;
    (scheme.eq_ignore_ascii_case("bearer") && fields.next().is_none()).then_some(token)
}

#[derive(Clone, Debug)]
pub struct LoginSuccess {
    pub email: String,
    pub classification: Classification,
    pub token: SessionToken,
}

pub struct Authenticator {
    identities: Arc<dyn IdentityStore>,
    tokens: TokenManager,
    api_keys: ApiKeys,
}

impl Authenticator {
    #[must_use]
    pub fn new(identities: Arc<dyn IdentityStore>, tokens: TokenManager, api_keys: ApiKeys) -> Self {
        Self {
            identities,
            tokens,
            api_keys,
        }
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// # Errors
    /// Returns the [`AuthError`] describing why the login was refused.
    pub async fn authenticate(&self, attempt: LoginAttempt<'_>) -> Result<LoginSuccess, AuthError> {
        match attempt {
            LoginAttempt::Bearer {
                authorization,
                refresh_token,
            } => self.login_with_bearer(authorization, refresh_token).await,
            LoginAttempt::Credentials {
                api_key,
                username,
                password,
            } => self.login_with_credentials(api_key, username, password).await,
        }
    }

    /// Renew a session from its access token and refresh token.
    ///
    /// The access-expiry check runs against the session as it was before the
    /// refresh. A client presenting an access token past its window therefore
    /// gets `BearerTokenExpired` even though a new pair was already stored;
    /// that pair is never returned and ages out with the store TTL.
    ///
    /// # Errors
    /// See [`AuthError`].
    #[instrument(skip_all)]
    pub async fn login_with_bearer(
        &self,
        authorization: &str,
        refresh_token: &str,
    ) -> Result<LoginSuccess, AuthError> {
        let access_token = bearer_token(authorization).ok_or(AuthError::MalformedBearer)?;

        let session = match self.tokens.validate(access_token).await {
            Ok(session) => session,
            Err(TokenError::NotFound) => return Err(AuthError::InvalidBearer),
            Err(err) => return Err(AuthError::Session(err)),
        };

        if refresh_token.is_empty() || refresh_token != session.refresh_token {
            return Err(AuthError::RefreshTokenInvalid);
        }

        if self.tokens.is_refresh_expired(&session) {
            return Err(AuthError::RefreshTokenExpired);
        }

        let refreshed = self
            .tokens
            .refresh(&session)
            .await
            .map_err(AuthError::Provisioning)?;

        if self.tokens.is_access_expired(&session) {
            debug!("Access window of the presented token had already lapsed");
            return Err(AuthError::BearerTokenExpired);
        }

        let identity = self
            .identities
            .find_by_username(&refreshed.username)
            .await?
            .ok_or(AuthError::UnknownTokenOwner)?;

        info!("Session refreshed");

        Ok(success(identity, refreshed))
    }

    /// Start a session from an API key and username/password.
    ///
    /// Unknown users and wrong passwords produce the same error so the
    /// response does not reveal which accounts exist.
    ///
    /// # Errors
    /// See [`AuthError`].
    #[instrument(skip(self, api_key, password))]
    pub async fn login_with_credentials(
        &self,
        api_key: &str,
        username: &str,
        password: &str,
    ) -> Result<LoginSuccess, AuthError> {
        let platform = self
            .api_keys
            .platform(api_key)
            .ok_or(AuthError::InvalidApiKey)?;

        if username.is_empty() || password.is_empty() {
            return Err(AuthError::MissingPassword);
        }

        let Some(identity) = self.identities.find_by_username(username).await? else {
            return Err(AuthError::InvalidCredentials);
        };

        if !password::verify(password, &identity.password) {
            warn!("Password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        let token = self
            .tokens
            .provision(username)
            .await
            .map_err(AuthError::Provisioning)?;

        info!(platform, "Session provisioned");

        Ok(success(identity, token))
    }
}

fn success(identity: Identity, token: SessionToken) -> LoginSuccess {
    LoginSuccess {
        classification: classify(&identity, epoch_now()),
        email: identity.email,
        token,
    }
}
