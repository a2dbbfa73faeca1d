//! Drawbridge Proxy Library
//!
//! A TCP forwarding proxy with automatic TLS certificates.
//!
//! This library provides the core components for running TLS-terminating
//! listeners whose certificates are obtained on demand via ACME:
//!
//! - **Listeners**: TCP accept loops forwarding to a single upstream
//! - **Services**: Cross-cutting facilities hooked into listeners at startup
//! - **ACME**: On-demand certificate issuance gated by a host registry
//!
//! # Example
//!
//! ```ignore
//! use drawbridge_proxy::{Listener, services, Service};
//! use drawbridge_config::Config;
//!
//! let config = Config::from_file("drawbridge.kdl")?;
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let services = services(&config, shutdown_rx)?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod server;
pub mod service;

// ============================================================================
// Public Re-exports
// ============================================================================

pub use acme::{AcmeService, CertificateProvider, HostRegistry, OnDemandResolver};
pub use server::{Listener, ResolverSlot, Server};
pub use service::{services, Disabled, Service, ServiceError};
