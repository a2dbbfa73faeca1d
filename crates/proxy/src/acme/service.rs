//! The ACME authorization service.
//!
//! Owns the host registry, the certificate provider and the handshake
//! resolver, and implements the generic [`Service`] lifecycle contract the
//! listener-management code drives:
//!
//! - `apply` installs the on-demand resolver into a listener's certificate
//!   slot and claims the listener's hostnames in the shared registry;
//! - `forget` releases the hostnames again.
//!
//! The registry is the sole issuance gate: the certificate provider
//! consults it (through the host policy closure) on every handshake-path
//! lookup, so a hostname becomes issuable the instant `apply` returns and
//! stops being issuable the instant `forget` does.

use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::server::ResolvesServerCert;
use rustls::sign::CertifiedKey;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use drawbridge_config::{AcmeConfig, ChallengeKind};

use crate::server::Server;
use crate::service::{Disabled, Service, ServiceError};

use super::challenge::{self, ChallengeManager};
use super::client::AcmeClient;
use super::error::ProviderError;
use super::provider::{
    certified_key_from_pem, CertificateProvider, HostPolicy, ManagedCertificates,
};
use super::registry::HostRegistry;
use super::resolver::OnDemandResolver;
use super::storage::CertificateStorage;

/// Authorization gate for on-demand TLS certificate issuance
#[derive(Debug)]
pub struct AcmeService {
    registry: Arc<HostRegistry>,
    provider: Arc<dyn CertificateProvider>,
    resolver: Arc<OnDemandResolver>,
}

impl AcmeService {
    /// Build the service from the optional `acme` configuration block
    ///
    /// Without the block the feature is disabled: the returned service is
    /// a null object whose operations all succeed without doing anything,
    /// so callers never branch on enablement.
    ///
    /// When enabled this also spawns the issuance worker and, for HTTP-01,
    /// binds and spawns the challenge listener. The bind happens here so a
    /// bad `bind` address fails startup instead of a background task; both
    /// tasks stop when `shutdown` signals.
    pub fn from_config(
        config: Option<&AcmeConfig>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Arc<dyn Service>> {
        let Some(config) = config else {
            debug!("No acme block configured; automatic certificates disabled");
            return Ok(Arc::new(Disabled("acme")));
        };

        let registry = Arc::new(HostRegistry::new());
        let policy: HostPolicy = {
            let registry = Arc::clone(&registry);
            Arc::new(move |host: &str| registry.authorize(host))
        };

        let storage = Arc::new(
            CertificateStorage::new(&config.cache_dir)
                .context("Failed to initialize certificate cache")?,
        );
        let challenges = Arc::new(ChallengeManager::new());

        let (provider, issue_rx) = ManagedCertificates::new(Arc::clone(&storage), policy);
        let provider = Arc::new(provider);

        let client = AcmeClient::new(config.clone(), storage, Arc::clone(&challenges));
        tokio::spawn(issuance_worker(
            client,
            Arc::clone(&provider),
            issue_rx,
            shutdown.clone(),
        ));

        if config.challenge == ChallengeKind::Http01 {
            let listener = std::net::TcpListener::bind(&config.bind).with_context(|| {
                format!("Failed to bind HTTP-01 challenge listener on {}", config.bind)
            })?;
            listener
                .set_nonblocking(true)
                .context("Failed to configure HTTP-01 challenge listener")?;
            tokio::spawn(challenge::serve(listener, challenges, shutdown));
        }

        Ok(Arc::new(Self::assemble(registry, provider)))
    }

    fn assemble(registry: Arc<HostRegistry>, provider: Arc<dyn CertificateProvider>) -> Self {
        let resolver = Arc::new(OnDemandResolver::new(Arc::clone(&provider)));
        Self {
            registry,
            provider,
            resolver,
        }
    }

    /// The shared host registry
    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    /// Synchronous certificate lookup, delegated to the provider
    pub fn certificate(&self, server_name: &str) -> Result<Arc<CertifiedKey>, ProviderError> {
        self.provider.certificate(server_name)
    }
}

impl Service for AcmeService {
    fn name(&self) -> &'static str {
        "acme"
    }

    fn apply(&self, server: &dyn Server) -> Result<(), ServiceError> {
        let listener_id = server.config().id.clone();

        let Some(tls) = server.tls() else {
            debug!(listener = %listener_id, "No TLS block; nothing to authorize");
            return Ok(());
        };
        let Some(slot) = server.cert_resolver_slot() else {
            debug!(
                listener = %listener_id,
                "Server type has no certificate-resolver slot; skipping"
            );
            return Ok(());
        };

        slot.install(Arc::clone(&self.resolver) as Arc<dyn ResolvesServerCert>);
        self.registry.register(&tls.acme_hosts)?;

        info!(
            listener = %listener_id,
            hosts = ?tls.acme_hosts,
            "Registered acme hosts"
        );
        Ok(())
    }

    fn forget(&self, server: &dyn Server) -> Result<(), ServiceError> {
        let Some(tls) = server.tls() else {
            return Ok(());
        };

        self.registry.unregister(&tls.acme_hosts);
        debug!(
            listener = %server.config().id,
            hosts = ?tls.acme_hosts,
            "Unregistered acme hosts"
        );
        Ok(())
    }
}

/// Background task obtaining certificates queued by the provider
async fn issuance_worker(
    client: AcmeClient,
    provider: Arc<ManagedCertificates>,
    mut queue: mpsc::UnboundedReceiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let host = tokio::select! {
            _ = shutdown.changed() => break,
            host = queue.recv() => match host {
                Some(host) => host,
                None => break,
            },
        };

        match client.obtain(&host).await {
            Ok(issued) => match certified_key_from_pem(&issued.cert_pem, &issued.key_pem) {
                Ok(key) => provider.install(&host, Arc::new(key)),
                Err(e) => {
                    provider.issuance_failed(&host);
                    error!(host = %host, error = %e, "Issued certificate is unusable");
                }
            },
            Err(e) => {
                provider.issuance_failed(&host);
                error!(host = %host, error = %e, "Certificate issuance failed");
            }
        }
    }

    debug!("Issuance worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::Listener;
    use dashmap::DashMap;
    use drawbridge_config::{ListenerConfig, TlsConfig};

    /// Provider stub: authorizes through the supplied policy, never issues
    struct StubProvider {
        policy: HostPolicy,
        certs: DashMap<String, Arc<CertifiedKey>>,
    }

    impl std::fmt::Debug for StubProvider {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("StubProvider")
                .field("certs", &self.certs.len())
                .finish()
        }
    }

    impl CertificateProvider for StubProvider {
        fn certificate(&self, server_name: &str) -> Result<Arc<CertifiedKey>, ProviderError> {
            (self.policy)(server_name)?;
            self.certs
                .get(server_name)
                .map(|k| Arc::clone(&k))
                .ok_or_else(|| ProviderError::IssuancePending(server_name.to_string()))
        }
    }

    fn gate() -> (Arc<HostRegistry>, AcmeService) {
        let registry = Arc::new(HostRegistry::new());
        let policy: HostPolicy = {
            let registry = Arc::clone(&registry);
            Arc::new(move |host: &str| registry.authorize(host))
        };
        let provider = Arc::new(StubProvider {
            policy,
            certs: DashMap::new(),
        });
        let service = AcmeService::assemble(Arc::clone(&registry), provider);
        (registry, service)
    }

    fn listener(id: &str, hosts: Option<&[&str]>) -> Listener {
        Listener::new(ListenerConfig {
            id: id.into(),
            address: "127.0.0.1:0".into(),
            upstream: "127.0.0.1:3000".into(),
            tls: hosts.map(|hosts| TlsConfig {
                acme_hosts: hosts.iter().map(|h| h.to_string()).collect(),
            }),
        })
    }

    /// Server without the certificate-resolver capability
    struct PlainServer(ListenerConfig);

    impl Server for PlainServer {
        fn config(&self) -> &ListenerConfig {
            &self.0
        }
    }

    #[test]
    fn disabled_service_is_a_safe_no_op() {
        let (_tx, rx) = watch::channel(false);
        let service = AcmeService::from_config(None, rx).unwrap();
        assert_eq!(service.name(), "acme");

        let server = listener("web", Some(&["a.example.com"]));
        service.apply(&server).unwrap();
        service.apply(&server).unwrap();
        service.forget(&server).unwrap();
    }

    #[test]
    fn apply_registers_hosts_and_installs_the_resolver() {
        let (registry, service) = gate();
        let server = listener("web", Some(&["a.example.com", "b.example.com"]));

        service.apply(&server).unwrap();

        assert!(registry.authorize("a.example.com").is_ok());
        assert!(registry.authorize("b.example.com").is_ok());
        assert!(server.cert_resolver_slot().unwrap().installed());
    }

    #[test]
    fn apply_without_tls_is_a_no_op() {
        let (registry, service) = gate();
        let server = listener("plain", None);

        service.apply(&server).unwrap();

        assert!(registry.is_empty());
        assert!(!server.cert_resolver_slot().unwrap().installed());
    }

    #[test]
    fn apply_skips_servers_without_the_capability() {
        let (registry, service) = gate();
        let server = PlainServer(ListenerConfig {
            id: "odd".into(),
            address: "127.0.0.1:0".into(),
            upstream: "127.0.0.1:3000".into(),
            tls: Some(TlsConfig {
                acme_hosts: vec!["a.example.com".into()],
            }),
        });

        service.apply(&server).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn overlapping_apply_fails_and_names_the_conflict() {
        let (registry, service) = gate();
        let first = listener("web", Some(&["a.example.com", "b.example.com"]));
        let second = listener("alt", Some(&["b.example.com"]));

        service.apply(&first).unwrap();
        let err = service.apply(&second).unwrap_err();
        assert!(err.to_string().contains("b.example.com"));

        // First listener's claims are untouched.
        assert_eq!(registry.len(), 2);
        assert!(registry.authorize("a.example.com").is_ok());
        assert!(registry.authorize("b.example.com").is_ok());
    }

    #[test]
    fn forget_releases_hosts_and_is_idempotent() {
        let (registry, service) = gate();
        let server = listener("web", Some(&["a.example.com", "b.example.com"]));

        service.apply(&server).unwrap();
        service.forget(&server).unwrap();

        assert!(registry.is_empty());
        let err = service.certificate("a.example.com").unwrap_err();
        assert_eq!(err.to_string(), "acme: host a.example.com is not configured");

        service.forget(&server).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn forget_then_reapply_succeeds() {
        let (_registry, service) = gate();
        let server = listener("web", Some(&["a.example.com"]));

        service.apply(&server).unwrap();
        service.forget(&server).unwrap();
        service.apply(&server).unwrap();
    }

    #[test]
    fn certificate_lookup_is_gated_by_the_registry() {
        let (_registry, service) = gate();
        let server = listener("web", Some(&["a.example.com"]));

        let err = service.certificate("a.example.com").unwrap_err();
        assert!(matches!(err, ProviderError::Unauthorized(_)));

        service.apply(&server).unwrap();
        // Now authorized; the stub has no certificate yet.
        let err = service.certificate("a.example.com").unwrap_err();
        assert!(matches!(err, ProviderError::IssuancePending(_)));
    }

    #[tokio::test]
    async fn from_config_reports_a_bad_bind_address() {
        let (_tx, rx) = watch::channel(false);
        let temp = tempfile::TempDir::new().unwrap();
        let config = AcmeConfig {
            cache_dir: temp.path().to_path_buf(),
            challenge: ChallengeKind::Http01,
            // Port 1 on a non-local address cannot be bound.
            bind: "192.0.2.1:1".into(),
            email: None,
            staging: true,
        };

        let err = AcmeService::from_config(Some(&config), rx).unwrap_err();
        assert!(err.to_string().contains("challenge listener"));
    }

    #[tokio::test]
    async fn from_config_builds_an_enabled_service() {
        let (_tx, rx) = watch::channel(false);
        let temp = tempfile::TempDir::new().unwrap();
        let config = AcmeConfig {
            cache_dir: temp.path().join("cache"),
            challenge: ChallengeKind::Http01,
            bind: "127.0.0.1:0".into(),
            email: None,
            staging: true,
        };

        let service = AcmeService::from_config(Some(&config), rx).unwrap();
        let server = listener("web", Some(&["a.example.com"]));
        service.apply(&server).unwrap();
        service.forget(&server).unwrap();
    }
}
