//! Automatic TLS certificates via the ACME protocol.
//!
//! Certificates are obtained on demand: the first TLS handshake naming an
//! authorized hostname queues an order, and subsequent handshakes serve
//! the issued certificate from the in-memory cache. Which hostnames are
//! eligible is decided entirely by the [`HostRegistry`], populated from
//! listener configuration at startup.
//!
//! Module layout:
//!
//! - [`registry`]   — process-wide set of authorized hostnames
//! - [`service`]    — the [`AcmeService`] lifecycle (apply/forget)
//! - [`provider`]   — certificate lookup with caching and issuance queueing
//! - [`resolver`]   — the rustls SNI resolver bridging handshakes to the provider
//! - [`client`]     — the ACME account and order machinery
//! - [`challenge`]  — HTTP-01 challenge token store and listener
//! - [`storage`]    — on-disk certificate and credential cache

pub mod challenge;
pub mod client;
pub mod error;
pub mod provider;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod storage;

pub use challenge::ChallengeManager;
pub use client::AcmeClient;
pub use error::{AcmeError, HostAlreadyConfigured, HostNotConfigured, ProviderError};
pub use provider::{CertificateProvider, HostPolicy, ManagedCertificates};
pub use registry::HostRegistry;
pub use resolver::OnDemandResolver;
pub use service::AcmeService;
pub use storage::CertificateStorage;
