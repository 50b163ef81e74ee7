//! # login-api
//!
//! Login and session token service for legacy clients.
//!
//! `POST /login` accepts either an API key with username and password, or a
//! bearer access token together with its refresh token. Both flows answer with
//! a fresh token pair and the account's subscription class. Sessions live in
//! Redis; accounts are read from the existing customer database.
//!
//! Addresses that keep failing are banned for a rolling window, see
//! [`auth::ban`].

pub mod auth;
pub mod cli;
pub mod login;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};
