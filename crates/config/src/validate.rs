//! Configuration validation.
//!
//! Fail-fast checks run after parsing, before any socket is bound. The
//! host registry independently enforces hostname uniqueness at apply time;
//! catching the duplicate here surfaces it with the offending listeners
//! named instead of failing mid-startup.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::Config;

/// Validate a parsed configuration
pub fn validate(config: &Config) -> Result<()> {
    if let Some(acme) = &config.acme {
        if acme.bind.parse::<SocketAddr>().is_err() {
            bail!(
                "Invalid acme bind address '{}': expected host:port, e.g., \"0.0.0.0:80\"",
                acme.bind
            );
        }
        if acme.cache_dir.as_os_str().is_empty() {
            bail!("acme cache-dir must not be empty");
        }
    }

    let mut seen_hosts: HashMap<&str, &str> = HashMap::new();

    for listener in &config.listeners {
        if listener.address.parse::<SocketAddr>().is_err() {
            bail!(
                "Listener '{}' has invalid address '{}': expected host:port",
                listener.id,
                listener.address
            );
        }
        if listener.upstream.parse::<SocketAddr>().is_err() {
            bail!(
                "Listener '{}' has invalid upstream '{}': expected host:port",
                listener.id,
                listener.upstream
            );
        }

        for host in listener.acme_hosts() {
            if !is_plausible_hostname(host) {
                bail!(
                    "Listener '{}' declares invalid acme host '{}'",
                    listener.id,
                    host
                );
            }
            if listener.tls.is_some() && config.acme.is_none() {
                bail!(
                    "Listener '{}' declares acme hosts but no acme block is configured",
                    listener.id
                );
            }
            if let Some(previous) = seen_hosts.insert(host, &listener.id) {
                bail!(
                    "Acme host '{}' is declared by both listener '{}' and listener '{}'",
                    host,
                    previous,
                    listener.id
                );
            }
        }
    }

    Ok(())
}

/// Cheap sanity check for a DNS hostname
///
/// Issuance-time validation belongs to the certificate authority; this only
/// rejects values that can never be a hostname.
fn is_plausible_hostname(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && !host.starts_with('.')
        && !host.ends_with('.')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}
