//! Cross-cutting services applied to servers.
//!
//! A service is a process-wide facility that hooks into individual servers
//! at startup (`apply`) and unhooks when a server is torn down (`forget`).
//! The start-up code builds the full service list once from configuration
//! and drives every server through it; a feature that is configured off is
//! represented by [`Disabled`], so the driving code never branches on
//! enablement.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use drawbridge_config::Config;

use crate::acme::{AcmeService, HostAlreadyConfigured};
use crate::server::Server;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    HostConflict(#[from] HostAlreadyConfigured),
}

/// Lifecycle contract between a service and the servers it decorates
pub trait Service: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Hook the service into a server. Called once per server at startup;
    /// a failure aborts startup, so implementations must leave no partial
    /// state behind when they return an error.
    fn apply(&self, server: &dyn Server) -> Result<(), ServiceError>;

    /// Release whatever `apply` claimed for this server. Idempotent.
    fn forget(&self, server: &dyn Server) -> Result<(), ServiceError>;
}

/// Null object for a service whose feature is configured off
#[derive(Debug)]
pub struct Disabled(pub &'static str);

impl Service for Disabled {
    fn name(&self) -> &'static str {
        self.0
    }

    fn apply(&self, _server: &dyn Server) -> Result<(), ServiceError> {
        Ok(())
    }

    fn forget(&self, _server: &dyn Server) -> Result<(), ServiceError> {
        Ok(())
    }
}

/// Assemble the full service list from configuration
pub fn services(
    config: &Config,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<Arc<dyn Service>>> {
    let services: Vec<Arc<dyn Service>> =
        vec![AcmeService::from_config(config.acme.as_ref(), shutdown)?];

    debug!(
        services = ?services.iter().map(|s| s.name()).collect::<Vec<_>>(),
        "Assembled service list"
    );
    Ok(services)
}
