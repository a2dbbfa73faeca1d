//! Listener configuration.

use serde::{Deserialize, Serialize};

/// A single TCP listener definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Listener identifier, e.g. "web"
    pub id: String,
    /// Local bind address, e.g. "0.0.0.0:443"
    pub address: String,
    /// Upstream address traffic is forwarded to, e.g. "127.0.0.1:8080"
    pub upstream: String,
    /// TLS termination; absent means the listener speaks plain TCP
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// Per-listener TLS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Hostnames eligible for automatically provisioned certificates
    #[serde(default)]
    pub acme_hosts: Vec<String>,
}

impl ListenerConfig {
    /// Hostnames this listener wants automatic certificates for
    ///
    /// Empty when the listener has no TLS block.
    pub fn acme_hosts(&self) -> &[String] {
        self.tls.as_ref().map(|t| t.acme_hosts.as_slice()).unwrap_or(&[])
    }
}
