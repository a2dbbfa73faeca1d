//! HTTP-01 challenge handling.
//!
//! Keeps the pending token -> key-authorization map and serves it over a
//! plain HTTP listener on the configured bind address. The CA validates
//! domain control by fetching `/.well-known/acme-challenge/<token>`; every
//! other path is a 404.

use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use http::StatusCode;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

/// HTTP-01 challenge path prefix
pub const CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Pending HTTP-01 challenges
///
/// Concurrent inserts come from the issuance worker while request-handling
/// tasks read; `DashMap` keeps both sides lock-free from each other.
#[derive(Debug, Default)]
pub struct ChallengeManager {
    tokens: DashMap<String, String>,
}

impl ChallengeManager {
    /// Create an empty challenge manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending challenge before telling the CA it is ready
    pub fn insert(&self, token: &str, key_authorization: &str) {
        debug!(token = %token, "Registered HTTP-01 challenge");
        self.tokens
            .insert(token.to_string(), key_authorization.to_string());
    }

    /// Drop a challenge once validated or abandoned
    pub fn remove(&self, token: &str) {
        if self.tokens.remove(token).is_some() {
            debug!(token = %token, "Removed HTTP-01 challenge");
        }
    }

    /// Key authorization for a token, if the challenge is pending
    pub fn response(&self, token: &str) -> Option<String> {
        let response = self.tokens.get(token).map(|v| v.clone());
        trace!(token = %token, found = response.is_some(), "HTTP-01 challenge lookup");
        response
    }

    /// Extract the challenge token from a request path
    pub fn token_from_path(path: &str) -> Option<&str> {
        let token = path.strip_prefix(CHALLENGE_PREFIX)?;
        if token.is_empty() || token.contains('/') {
            return None;
        }
        Some(token)
    }
}

/// Build the HTTP response for a challenge-listener request
fn respond(path: &str, challenges: &ChallengeManager) -> Response<Full<Bytes>> {
    match ChallengeManager::token_from_path(path).and_then(|t| challenges.response(t)) {
        Some(key_authorization) => {
            let mut response = Response::new(Full::from(key_authorization));
            response.headers_mut().insert(
                http::header::CONTENT_TYPE,
                http::HeaderValue::from_static("text/plain"),
            );
            response
        }
        None => {
            let mut response = Response::new(Full::default());
            *response.status_mut() = StatusCode::NOT_FOUND;
            response
        }
    }
}

/// Serve HTTP-01 challenge responses until shutdown
///
/// The listener is bound by the caller so bind failures surface at service
/// construction; this task only accepts and serves.
pub async fn serve(
    listener: std::net::TcpListener,
    challenges: Arc<ChallengeManager>,
    mut shutdown: watch::Receiver<bool>,
) {
    let listener = match tokio::net::TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "Failed to adopt HTTP-01 challenge listener");
            return;
        }
    };

    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "HTTP-01 challenge listener started");
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("HTTP-01 challenge listener shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "HTTP-01 challenge accept failed");
                        continue;
                    }
                };

                trace!(peer = %peer, "HTTP-01 challenge connection");
                let challenges = challenges.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let challenges = challenges.clone();
                        async move {
                            Ok::<_, Infallible>(respond(req.uri().path(), &challenges))
                        }
                    });

                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!(peer = %peer, error = %e, "HTTP-01 challenge connection error");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn token_round_trip() {
        let challenges = ChallengeManager::new();
        challenges.insert("token123", "token123.thumbprint");

        assert_eq!(
            challenges.response("token123").as_deref(),
            Some("token123.thumbprint")
        );
        assert_eq!(challenges.response("unknown"), None);

        challenges.remove("token123");
        assert_eq!(challenges.response("token123"), None);
    }

    #[test]
    fn token_extraction() {
        assert_eq!(
            ChallengeManager::token_from_path("/.well-known/acme-challenge/abc123"),
            Some("abc123")
        );
        assert_eq!(ChallengeManager::token_from_path("/.well-known/other"), None);
        assert_eq!(ChallengeManager::token_from_path("/"), None);
        assert_eq!(
            ChallengeManager::token_from_path("/.well-known/acme-challenge/"),
            None
        );
        assert_eq!(
            ChallengeManager::token_from_path("/.well-known/acme-challenge/a/b"),
            None
        );
    }

    #[test]
    fn respond_serves_pending_challenge() {
        let challenges = ChallengeManager::new();
        challenges.insert("abc", "abc.key-auth");

        let ok = respond("/.well-known/acme-challenge/abc", &challenges);
        assert_eq!(ok.status(), StatusCode::OK);

        let missing = respond("/.well-known/acme-challenge/def", &challenges);
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let other = respond("/health", &challenges);
        assert_eq!(other.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listener_serves_key_authorization_over_http() {
        let challenges = Arc::new(ChallengeManager::new());
        challenges.insert("tok", "tok.auth");

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve(listener, challenges.clone(), shutdown_rx));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                b"GET /.well-known/acme-challenge/tok HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n",
            )
            .await
            .unwrap();

        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("tok.auth"));

        shutdown_tx.send(true).unwrap();
        server.await.unwrap();
    }
}
