//! KDL document parsing.

use anyhow::{anyhow, Result};
use kdl::{KdlDocument, KdlNode};
use std::path::PathBuf;
use tracing::trace;

use crate::{AcmeConfig, ChallengeKind, Config, ListenerConfig, TlsConfig};

mod helpers;

use helpers::{get_bool_entry, get_child, get_first_arg_string, get_string_args, get_string_entry};

/// Parse a full configuration document
pub fn parse_document(content: &str) -> Result<Config> {
    let doc: KdlDocument = content
        .parse()
        .map_err(|e| anyhow!("Invalid KDL document: {e}"))?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "acme" => config.acme = Some(parse_acme(node)?),
            "listeners" => config.listeners = parse_listeners(node)?,
            other => {
                return Err(anyhow!(
                    "Unknown top-level block '{other}'. Valid blocks: acme, listeners"
                ));
            }
        }
    }

    Ok(config)
}

/// Parse the `acme` block
fn parse_acme(node: &KdlNode) -> Result<AcmeConfig> {
    trace!("Parsing acme configuration block");

    let cache_dir = get_string_entry(node, "cache-dir")
        .map(PathBuf::from)
        .ok_or_else(|| {
            anyhow!("acme block requires a 'cache-dir' field, e.g., cache-dir \"/var/lib/drawbridge/acme\"")
        })?;

    let challenge_str = get_string_entry(node, "challenge").unwrap_or_else(|| "http".to_string());
    let challenge = ChallengeKind::parse(&challenge_str).ok_or_else(|| {
        anyhow!("Invalid challenge kind '{challenge_str}' in acme block. Valid kinds: http")
    })?;

    let bind = get_string_entry(node, "bind").ok_or_else(|| {
        anyhow!("acme block requires a 'bind' field, e.g., bind \"0.0.0.0:80\"")
    })?;

    let config = AcmeConfig {
        cache_dir,
        challenge,
        bind,
        email: get_string_entry(node, "email"),
        staging: get_bool_entry(node, "staging").unwrap_or(false),
    };

    trace!(
        cache_dir = %config.cache_dir.display(),
        challenge = %config.challenge,
        bind = %config.bind,
        staging = config.staging,
        "Parsed acme configuration"
    );

    Ok(config)
}

/// Parse the `listeners` block
fn parse_listeners(node: &KdlNode) -> Result<Vec<ListenerConfig>> {
    trace!("Parsing listeners configuration block");
    let mut listeners = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() != "listener" {
                continue;
            }

            let id = get_first_arg_string(child).ok_or_else(|| {
                anyhow!("Listener requires an ID argument, e.g., listener \"web\" {{ ... }}")
            })?;

            trace!(listener_id = %id, "Parsing listener");

            let address = get_string_entry(child, "address").ok_or_else(|| {
                anyhow!(
                    "Listener '{id}' requires an 'address' field, e.g., address \"0.0.0.0:443\""
                )
            })?;

            let upstream = get_string_entry(child, "upstream").ok_or_else(|| {
                anyhow!(
                    "Listener '{id}' requires an 'upstream' field, e.g., upstream \"127.0.0.1:8080\""
                )
            })?;

            let tls = get_child(child, "tls").map(parse_tls);

            trace!(
                listener_id = %id,
                address = %address,
                upstream = %upstream,
                tls = tls.is_some(),
                "Parsed listener"
            );

            listeners.push(ListenerConfig {
                id,
                address,
                upstream,
                tls,
            });
        }
    }

    Ok(listeners)
}

/// Parse a listener's `tls` block
fn parse_tls(node: &KdlNode) -> TlsConfig {
    let acme_hosts = get_child(node, "acme-hosts")
        .map(get_string_args)
        .unwrap_or_default();

    TlsConfig { acme_hosts }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_top_level_block_is_rejected() {
        let err = parse_document("bogus { }").unwrap_err();
        assert!(err.to_string().contains("Unknown top-level block"));
    }

    #[test]
    fn acme_requires_cache_dir() {
        let err = parse_document("acme {\n    bind \"0.0.0.0:80\"\n}").unwrap_err();
        assert!(err.to_string().contains("cache-dir"));
    }

    #[test]
    fn acme_rejects_unknown_challenge() {
        let err = parse_document(
            "acme {\n    cache-dir \"/tmp/x\"\n    challenge \"dns\"\n    bind \"0.0.0.0:80\"\n}",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Invalid challenge kind 'dns'"));
    }

    #[test]
    fn challenge_defaults_to_http() {
        let config = parse_document(
            "acme {\n    cache-dir \"/tmp/x\"\n    bind \"0.0.0.0:80\"\n}",
        )
        .unwrap();
        assert_eq!(config.acme.unwrap().challenge, ChallengeKind::Http01);
    }

    #[test]
    fn listener_requires_id_and_address() {
        let err = parse_document("listeners {\n    listener {\n    }\n}").unwrap_err();
        assert!(err.to_string().contains("ID argument"));

        let err = parse_document("listeners {\n    listener \"web\" {\n    }\n}").unwrap_err();
        assert!(err.to_string().contains("'address'"));
    }

    #[test]
    fn tls_block_without_hosts_parses_empty() {
        let config = parse_document(
            "listeners {\n    listener \"web\" {\n        address \"0.0.0.0:443\"\n        upstream \"127.0.0.1:3000\"\n        tls {\n        }\n    }\n}",
        )
        .unwrap();
        let tls = config.listeners[0].tls.as_ref().unwrap();
        assert!(tls.acme_hosts.is_empty());
    }
}
