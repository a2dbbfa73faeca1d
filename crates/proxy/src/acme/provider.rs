//! Certificate provider boundary.
//!
//! A [`CertificateProvider`] answers the synchronous handshake-path
//! question "which certificate serves this SNI name?". The supplied
//! implementation, [`ManagedCertificates`], gates every lookup through the
//! host policy, then consults its in-memory cache, then the on-disk cache,
//! and finally queues background issuance for authorized hostnames it
//! cannot serve yet. Issuance itself (network round trips to the CA) never
//! happens on the handshake path.

use std::fmt;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use rustls::sign::CertifiedKey;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::error::{HostNotConfigured, ProviderError};
use super::storage::CertificateStorage;

/// Host-authorization predicate consulted before any certificate is served
/// or issued
pub type HostPolicy = Arc<dyn Fn(&str) -> Result<(), HostNotConfigured> + Send + Sync>;

/// Synchronous certificate lookup usable from a TLS handshake
pub trait CertificateProvider: Send + Sync + fmt::Debug {
    /// Certificate for the requested server name, or the reason there is
    /// none
    fn certificate(&self, server_name: &str) -> Result<Arc<CertifiedKey>, ProviderError>;
}

/// Disk- and memory-cached certificates with policy-gated on-demand
/// issuance
pub struct ManagedCertificates {
    storage: Arc<CertificateStorage>,
    policy: HostPolicy,
    /// Parsed certificates ready to serve
    cache: DashMap<String, Arc<CertifiedKey>>,
    /// Hostnames with an issuance already queued or in flight
    pending: DashSet<String>,
    issue_tx: mpsc::UnboundedSender<String>,
}

impl ManagedCertificates {
    /// Create a provider over `storage`, gated by `policy`
    ///
    /// The returned receiver feeds the issuance worker: each hostname sent
    /// on it needs a certificate obtained and [`install`](Self::install)ed.
    pub fn new(
        storage: Arc<CertificateStorage>,
        policy: HostPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (issue_tx, issue_rx) = mpsc::unbounded_channel();
        (
            Self {
                storage,
                policy,
                cache: DashMap::new(),
                pending: DashSet::new(),
                issue_tx,
            },
            issue_rx,
        )
    }

    /// Install a freshly issued certificate and clear its pending mark
    pub fn install(&self, host: &str, key: Arc<CertifiedKey>) {
        self.cache.insert(host.to_string(), key);
        self.pending.remove(host);
        info!(host = %host, "Certificate installed");
    }

    /// Clear the pending mark after a failed issuance so a later handshake
    /// can retry
    pub fn issuance_failed(&self, host: &str) {
        self.pending.remove(host);
    }

    fn request_issuance(&self, host: &str) {
        if !self.pending.insert(host.to_string()) {
            return;
        }
        if self.issue_tx.send(host.to_string()).is_err() {
            // Worker is gone; do not strand the host as forever-pending.
            self.pending.remove(host);
            warn!(host = %host, "Issuance worker unavailable; certificate request dropped");
        } else {
            info!(host = %host, "Queued certificate issuance");
        }
    }
}

impl CertificateProvider for ManagedCertificates {
    fn certificate(&self, server_name: &str) -> Result<Arc<CertifiedKey>, ProviderError> {
        // The registry gate is the sole authorization check.
        (self.policy)(server_name)?;

        if let Some(cached) = self.cache.get(server_name) {
            return Ok(Arc::clone(&cached));
        }

        if let Some(stored) = self.storage.load_certificate(server_name)? {
            if !stored.is_expired() {
                let key = certified_key_from_pem(&stored.cert_pem, &stored.key_pem)
                    .map_err(|e| ProviderError::BadCertificate(server_name.to_string(), e))?;
                let key = Arc::new(key);
                self.cache.insert(server_name.to_string(), Arc::clone(&key));
                debug!(host = %server_name, "Loaded certificate from disk cache");
                return Ok(key);
            }
            debug!(host = %server_name, "Cached certificate expired; reissuing");
        }

        self.request_issuance(server_name);
        Err(ProviderError::IssuancePending(server_name.to_string()))
    }
}

impl fmt::Debug for ManagedCertificates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedCertificates")
            .field("cached", &self.cache.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Parse a PEM certificate chain and private key into a rustls
/// [`CertifiedKey`]
pub fn certified_key_from_pem(cert_pem: &str, key_pem: &str) -> Result<CertifiedKey, String> {
    let certs = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid certificate chain: {e}"))?;
    if certs.is_empty() {
        return Err("certificate chain is empty".to_string());
    }

    let key_der = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|e| format!("invalid private key: {e}"))?
        .ok_or_else(|| "no private key found".to_string())?;
    let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key_der)
        .map_err(|e| format!("unsupported private key: {e}"))?;

    Ok(CertifiedKey::new(certs, signing_key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn allow_all() -> HostPolicy {
        Arc::new(|_: &str| Ok(()))
    }

    fn deny_all() -> HostPolicy {
        Arc::new(|host: &str| Err(HostNotConfigured(host.to_string())))
    }

    fn self_signed_pem(host: &str) -> (String, String) {
        let cert = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
        (cert.cert.pem(), cert.signing_key.serialize_pem())
    }

    fn setup(policy: HostPolicy) -> (
        TempDir,
        Arc<CertificateStorage>,
        ManagedCertificates,
        mpsc::UnboundedReceiver<String>,
    ) {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(CertificateStorage::new(temp.path()).unwrap());
        let (provider, issue_rx) = ManagedCertificates::new(storage.clone(), policy);
        (temp, storage, provider, issue_rx)
    }

    #[test]
    fn unauthorized_host_is_refused_before_anything_else() {
        let (_temp, _storage, provider, mut issue_rx) = setup(deny_all());

        let err = provider.certificate("evil.example.com").unwrap_err();
        assert!(matches!(err, ProviderError::Unauthorized(_)));
        assert_eq!(
            err.to_string(),
            "acme: host evil.example.com is not configured"
        );
        // Refusal must not queue issuance.
        assert!(issue_rx.try_recv().is_err());
    }

    #[test]
    fn authorized_host_without_certificate_queues_issuance_once() {
        let (_temp, _storage, provider, mut issue_rx) = setup(allow_all());

        for _ in 0..3 {
            let err = provider.certificate("a.example.com").unwrap_err();
            assert!(matches!(err, ProviderError::IssuancePending(_)));
        }

        assert_eq!(issue_rx.try_recv().unwrap(), "a.example.com");
        assert!(issue_rx.try_recv().is_err(), "issuance must be deduplicated");
    }

    #[test]
    fn serves_valid_certificate_from_disk_cache() {
        let (_temp, storage, provider, mut issue_rx) = setup(allow_all());

        let (cert_pem, key_pem) = self_signed_pem("a.example.com");
        storage
            .save_certificate(
                "a.example.com",
                &cert_pem,
                &key_pem,
                Utc::now() + chrono::Duration::days(60),
            )
            .unwrap();

        let key = provider.certificate("a.example.com").unwrap();
        assert!(!key.cert.is_empty());
        assert!(issue_rx.try_recv().is_err());

        // Second lookup comes from the memory cache and yields the same key.
        let again = provider.certificate("a.example.com").unwrap();
        assert!(Arc::ptr_eq(&key, &again));
    }

    #[test]
    fn expired_certificate_triggers_reissuance() {
        let (_temp, storage, provider, mut issue_rx) = setup(allow_all());

        let (cert_pem, key_pem) = self_signed_pem("old.example.com");
        storage
            .save_certificate(
                "old.example.com",
                &cert_pem,
                &key_pem,
                Utc::now() - chrono::Duration::days(1),
            )
            .unwrap();

        let err = provider.certificate("old.example.com").unwrap_err();
        assert!(matches!(err, ProviderError::IssuancePending(_)));
        assert_eq!(issue_rx.try_recv().unwrap(), "old.example.com");
    }

    #[test]
    fn install_makes_the_certificate_servable() {
        let (_temp, _storage, provider, mut issue_rx) = setup(allow_all());

        assert!(provider.certificate("a.example.com").is_err());
        assert_eq!(issue_rx.try_recv().unwrap(), "a.example.com");

        let (cert_pem, key_pem) = self_signed_pem("a.example.com");
        let key = Arc::new(certified_key_from_pem(&cert_pem, &key_pem).unwrap());
        provider.install("a.example.com", key);

        assert!(provider.certificate("a.example.com").is_ok());
    }

    #[test]
    fn failed_issuance_allows_retry() {
        let (_temp, _storage, provider, mut issue_rx) = setup(allow_all());

        assert!(provider.certificate("a.example.com").is_err());
        assert_eq!(issue_rx.try_recv().unwrap(), "a.example.com");

        provider.issuance_failed("a.example.com");

        assert!(provider.certificate("a.example.com").is_err());
        assert_eq!(
            issue_rx.try_recv().unwrap(),
            "a.example.com",
            "retry must re-queue issuance"
        );
    }

    #[test]
    fn garbage_pem_is_reported() {
        assert!(certified_key_from_pem("not pem", "not pem").is_err());

        let (cert_pem, _) = self_signed_pem("a.example.com");
        assert!(certified_key_from_pem(&cert_pem, "not a key").is_err());
    }
}
