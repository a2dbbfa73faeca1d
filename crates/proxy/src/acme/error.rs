//! Error types for the ACME module.

use thiserror::Error;

/// A hostname was requested that no listener has registered
///
/// This is the expected outcome for SNI probing or typos; it fails the one
/// handshake that asked and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("acme: host {0} is not configured")]
pub struct HostNotConfigured(pub String);

/// A hostname is already claimed in the shared host registry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("acme: host {0} is already configured")]
pub struct HostAlreadyConfigured(pub String);

/// Errors from the persistent certificate store
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid stored metadata: {0}")]
    Meta(#[from] serde_json::Error),
}

/// Errors surfaced by a certificate provider during a handshake lookup
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Unauthorized(#[from] HostNotConfigured),

    #[error("certificate for {0} is not issued yet; issuance started")]
    IssuancePending(String),

    #[error("stored certificate for {0} is unusable: {1}")]
    BadCertificate(String, String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors from the ACME issuance client
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("ACME account not available: {0}")]
    Account(String),

    #[error("HTTP-01 challenge not offered for {0}")]
    NoHttp01Challenge(String),

    #[error("Challenge failed: {0}")]
    ChallengeFailed(String),

    #[error("Order not ready: {0}")]
    OrderNotReady(String),

    #[error("ACME error: {0}")]
    Acme(#[from] instant_acme::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
