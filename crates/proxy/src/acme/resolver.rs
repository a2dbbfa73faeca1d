//! Handshake-time certificate resolution.

use std::fmt;
use std::sync::Arc;

use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use tracing::debug;

use super::error::ProviderError;
use super::provider::CertificateProvider;

/// SNI-to-certificate resolver backed by a [`CertificateProvider`]
///
/// Pure pass-through: no caching, no retries, no interpretation of the
/// provider's errors. A lookup failure fails that one handshake only.
pub struct OnDemandResolver {
    provider: Arc<dyn CertificateProvider>,
}

impl OnDemandResolver {
    pub fn new(provider: Arc<dyn CertificateProvider>) -> Self {
        Self { provider }
    }

    /// Synchronous certificate lookup for a requested server name
    pub fn certificate_for(&self, server_name: &str) -> Result<Arc<CertifiedKey>, ProviderError> {
        self.provider.certificate(server_name)
    }
}

impl ResolvesServerCert for OnDemandResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(server_name) = client_hello.server_name() else {
            debug!("TLS handshake without SNI; no certificate to serve");
            return None;
        };

        match self.certificate_for(server_name) {
            Ok(key) => Some(key),
            Err(e) => {
                debug!(host = %server_name, error = %e, "Refusing certificate");
                None
            }
        }
    }
}

impl fmt::Debug for OnDemandResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnDemandResolver")
            .field("provider", &self.provider)
            .finish()
    }
}
