use crate::{
    auth::ApiKeys,
    cli::actions::{server::Args, Action},
};
use anyhow::{anyhow, Context, Result};
use std::{net::IpAddr, path::PathBuf};

/// # Errors
/// Returns an error if required arguments are missing or malformed.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let redis_url = matches
        .get_one::<String>("redis-url")
        .cloned()
        .context("missing required argument: --redis-url")?;

    let key_prefix = matches
        .get_one::<String>("key-prefix")
        .cloned()
        .context("missing required argument: --key-prefix")?;

    let access_ttl = matches
        .get_one::<i64>("access-ttl")
        .copied()
        .context("missing required argument: --access-ttl")?;
    let refresh_ttl = matches
        .get_one::<i64>("refresh-ttl")
        .copied()
        .context("missing required argument: --refresh-ttl")?;

    let api_keys = matches
        .get_one::<String>("api-keys")
        .context("missing required argument: --api-keys")
        .and_then(|keys| ApiKeys::parse(keys).map_err(|e| anyhow!(e)))
        .context("invalid LOGIN_API_API_KEYS")?;

    let allowed_ips = matches
        .get_one::<String>("allowed-ips")
        .map(|ips| split_list(ips))
        .unwrap_or_default();

    let trusted_proxies = matches
        .get_one::<String>("trusted-proxies")
        .map(|proxies| {
            split_list(proxies)
                .iter()
                .map(|proxy| {
                    proxy
                        .parse::<IpAddr>()
                        .with_context(|| format!("invalid trusted proxy address: {proxy}"))
                })
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();

    let bypass_value = matches
        .get_one::<String>("bypass-value")
        .cloned()
        .context("missing required argument: --bypass-value")?;

    let audit_log = matches.get_one::<String>("audit-log").map(PathBuf::from);

    Ok(Action::Server(Args {
        port,
        dsn,
        redis_url,
        key_prefix,
        access_ttl,
        refresh_ttl,
        api_keys,
        allowed_ips,
        trusted_proxies,
        bypass_value,
        audit_log,
    }))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
