//! Drawbridge configuration
//!
//! Loads and validates the KDL configuration document that drives the
//! proxy: the optional process-wide `acme` block and the per-listener
//! definitions.
//!
//! # Example
//!
//! ```kdl
//! acme {
//!     cache-dir "/var/lib/drawbridge/acme"
//!     challenge "http"
//!     bind "0.0.0.0:80"
//!     email "admin@example.com"
//! }
//!
//! listeners {
//!     listener "web" {
//!         address "0.0.0.0:443"
//!         upstream "127.0.0.1:8080"
//!         tls {
//!             acme-hosts "example.com" "www.example.com"
//!         }
//!     }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

mod acme;
mod kdl;
mod listener;
mod validate;

pub use acme::{AcmeConfig, ChallengeKind};
pub use listener::{ListenerConfig, TlsConfig};

/// Top-level process configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Automatic certificate management; absent means the feature is disabled
    pub acme: Option<AcmeConfig>,
    /// TCP listeners to run
    pub listeners: Vec<ListenerConfig>,
}

impl Config {
    /// Load configuration from a KDL file on disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::from_kdl(&content)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))
    }

    /// Parse configuration from a KDL document string
    pub fn from_kdl(content: &str) -> Result<Self> {
        kdl::parse_document(content)
    }

    /// Validate the parsed configuration
    ///
    /// Pre-flight lint only: the host registry re-checks cross-listener
    /// hostname uniqueness at apply time.
    pub fn validate(&self) -> Result<()> {
        validate::validate(self)
    }
}
