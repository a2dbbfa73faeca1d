//! TCP listeners and the server abstraction services hook into.
//!
//! [`Server`] is the minimal surface a service needs: the listener's
//! configuration plus optional capabilities. The only capability today is
//! the certificate-resolver slot, which lets the TLS machinery be swapped
//! in after the server is constructed without the service knowing the
//! concrete server type.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use arc_swap::ArcSwapOption;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use drawbridge_config::{ListenerConfig, TlsConfig};

/// A running (or runnable) server, as seen by services
pub trait Server {
    fn config(&self) -> &ListenerConfig;

    /// The TLS block, when the listener terminates TLS
    fn tls(&self) -> Option<&TlsConfig> {
        self.config().tls.as_ref()
    }

    /// Capability: a slot a service can install a certificate resolver
    /// into. Server types without TLS support return `None` and services
    /// skip them.
    fn cert_resolver_slot(&self) -> Option<&ResolverSlot> {
        None
    }
}

/// Swappable certificate-resolver slot.
///
/// Starts empty; a handshake that arrives before a resolver is installed
/// fails rather than serving a default certificate.
pub struct ResolverSlot {
    inner: ArcSwapOption<Arc<dyn ResolvesServerCert>>,
}

impl ResolverSlot {
    pub fn new() -> Self {
        Self {
            inner: ArcSwapOption::new(None),
        }
    }

    pub fn install(&self, resolver: Arc<dyn ResolvesServerCert>) {
        self.inner.store(Some(Arc::new(resolver)));
    }

    pub fn clear(&self) {
        self.inner.store(None);
    }

    pub fn installed(&self) -> bool {
        self.inner.load().is_some()
    }

    pub fn current(&self) -> Option<Arc<dyn ResolvesServerCert>> {
        self.inner.load_full().map(|r| Arc::clone(&*r))
    }
}

impl Default for ResolverSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResolverSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverSlot")
            .field("installed", &self.installed())
            .finish()
    }
}

/// Rustls-facing view of a slot: delegates to whatever is installed
#[derive(Debug)]
struct SlotResolver {
    slot: Arc<ResolverSlot>,
}

impl ResolvesServerCert for SlotResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.slot.current()?.resolve(client_hello)
    }
}

/// A TCP listener forwarding connections to a single upstream
#[derive(Debug)]
pub struct Listener {
    config: ListenerConfig,
    slot: Arc<ResolverSlot>,
}

impl Listener {
    pub fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            slot: Arc::new(ResolverSlot::new()),
        }
    }

    /// Accept loop. Runs until `shutdown` signals.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.address)
            .await
            .with_context(|| {
                format!(
                    "Failed to bind listener {} on {}",
                    self.config.id, self.config.address
                )
            })?;

        let acceptor = if self.config.tls.is_some() {
            let tls_config = rustls::ServerConfig::builder()
                .with_no_client_auth()
                .with_cert_resolver(Arc::new(SlotResolver {
                    slot: Arc::clone(&self.slot),
                }));
            Some(TlsAcceptor::from(Arc::new(tls_config)))
        } else {
            None
        };

        info!(
            listener = %self.config.id,
            address = %self.config.address,
            tls = acceptor.is_some(),
            "Listener started"
        );

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(listener = %self.config.id, error = %e, "Accept failed");
                        continue;
                    }
                },
            };

            let upstream = self.config.upstream.clone();
            let acceptor = acceptor.clone();
            let id = self.config.id.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, &upstream, acceptor).await {
                    debug!(listener = %id, peer = %peer, error = %e, "Connection ended with error");
                }
            });
        }

        info!(listener = %self.config.id, "Listener stopped");
        Ok(())
    }
}

impl Server for Listener {
    fn config(&self) -> &ListenerConfig {
        &self.config
    }

    fn cert_resolver_slot(&self) -> Option<&ResolverSlot> {
        Some(&self.slot)
    }
}

async fn handle_connection(
    stream: TcpStream,
    upstream: &str,
    acceptor: Option<TlsAcceptor>,
) -> Result<()> {
    match acceptor {
        Some(acceptor) => {
            let mut tls = acceptor
                .accept(stream)
                .await
                .context("TLS handshake failed")?;
            let mut upstream = TcpStream::connect(upstream)
                .await
                .context("Upstream connect failed")?;
            tokio::io::copy_bidirectional(&mut tls, &mut upstream).await?;
        }
        None => {
            let mut stream = stream;
            let mut upstream = TcpStream::connect(upstream)
                .await
                .context("Upstream connect failed")?;
            tokio::io::copy_bidirectional(&mut stream, &mut upstream).await?;
        }
    }
    Ok(())
}
