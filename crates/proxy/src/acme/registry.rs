//! Shared host-authorization registry.
//!
//! One instance per process, owned by the authorization service and shared
//! with the certificate provider through the host policy predicate. A
//! hostname present in the set is authorized for automatic certificate
//! issuance; absence means issuance must be refused.
//!
//! # Locking
//!
//! Reads (one per TLS handshake needing a fresh certificate) take the
//! shared lock and never block each other; writes (listener apply/forget)
//! take the exclusive lock. The lock only ever protects the in-memory set,
//! never an I/O operation.

use parking_lot::RwLock;
use std::collections::HashSet;

use super::error::{HostAlreadyConfigured, HostNotConfigured};

/// Process-wide set of hostnames authorized for automatic certificates
#[derive(Debug, Default)]
pub struct HostRegistry {
    hosts: RwLock<HashSet<String>>,
}

impl HostRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Authorization predicate consulted before any certificate is served
    /// or issued for `host`
    pub fn authorize(&self, host: &str) -> Result<(), HostNotConfigured> {
        if self.hosts.read().contains(host) {
            Ok(())
        } else {
            Err(HostNotConfigured(host.to_string()))
        }
    }

    /// Register a batch of hostnames
    ///
    /// Atomic: the whole batch is validated for conflicts (against the
    /// registry and within the batch itself) before anything is inserted,
    /// so a failed call leaves the registry exactly as it was.
    pub fn register(&self, hosts: &[String]) -> Result<(), HostAlreadyConfigured> {
        let mut guard = self.hosts.write();

        let mut batch = HashSet::with_capacity(hosts.len());
        for host in hosts {
            if guard.contains(host.as_str()) || !batch.insert(host.as_str()) {
                return Err(HostAlreadyConfigured(host.clone()));
            }
        }

        for host in hosts {
            guard.insert(host.clone());
        }

        Ok(())
    }

    /// Remove a batch of hostnames
    ///
    /// Removing an absent hostname is a silent no-op, which makes the
    /// operation idempotent.
    pub fn unregister(&self, hosts: &[String]) {
        let mut guard = self.hosts.write();
        for host in hosts {
            guard.remove(host.as_str());
        }
    }

    /// Number of currently authorized hostnames
    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    /// Whether no hostname is currently authorized
    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }

    /// Consistent point-in-time copy of the authorized set
    pub fn snapshot(&self) -> HashSet<String> {
        self.hosts.read().clone()
    }
}
