//! Authentication and session state.
//!
//! ## Sessions
//!
//! A successful login yields an access token and a refresh token. Both are
//! opaque SHA-1 hex strings; the server keeps the session record in the
//! key-value store under the access token. The record expires with the
//! refresh window, so there is no session reaper.
//!
//! ## Failed attempts
//!
//! Requests answered with 400 or 401 count against the source address. The
//! tenth failure inside a rolling 300 second window bans the address until it
//! has been quiet for a full window. Counter reads fail open.
//!
//! ## Legacy credentials
//!
//! Passwords are stored as unsalted NTLM hashes (UTF-16LE, MD4, uppercase
//! hex). The format is dictated by the existing account database.

pub mod account;
pub mod authenticator;
pub mod ban;
pub mod error;
pub mod identity;
pub mod password;
pub mod store;
pub mod token;

pub use account::{AccountType, Classification};
pub use authenticator::{ApiKeys, Authenticator, LoginAttempt, LoginRequest, LoginSuccess};
pub use ban::{AbuseGuard, BanPolicy};
pub use error::AuthError;
pub use identity::{Identity, IdentityStore, PgIdentityStore};
pub use store::{KeyValueStore, MemoryStore, RedisStore, StoreError};
pub use token::{SessionToken, TokenConfig, TokenError, TokenManager};
