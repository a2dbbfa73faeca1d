//! ACME issuance client.
//!
//! Thin wrapper over `instant-acme` used by the background issuance
//! worker. Account credentials and issued certificates are persisted
//! through [`CertificateStorage`]; HTTP-01 key authorizations are published
//! through the [`ChallengeManager`] so the challenge listener can serve
//! them while the order validates.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use instant_acme::{
    Account, AuthorizationStatus, ChallengeType, Identifier, NewAccount, NewOrder, OrderStatus,
    RetryPolicy,
};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use drawbridge_config::AcmeConfig;

use super::challenge::ChallengeManager;
use super::error::AcmeError;
use super::storage::CertificateStorage;

const LETS_ENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
const LETS_ENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Timeout for order validation and certificate retrieval
const ORDER_TIMEOUT: Duration = Duration::from_secs(300);

/// A certificate obtained from the CA, already persisted to storage
#[derive(Debug)]
pub struct IssuedCertificate {
    pub cert_pem: String,
    pub key_pem: String,
    pub expires: DateTime<Utc>,
}

/// ACME protocol client with a lazily initialized account
pub struct AcmeClient {
    config: AcmeConfig,
    storage: Arc<CertificateStorage>,
    challenges: Arc<ChallengeManager>,
    account: RwLock<Option<Account>>,
}

impl AcmeClient {
    pub fn new(
        config: AcmeConfig,
        storage: Arc<CertificateStorage>,
        challenges: Arc<ChallengeManager>,
    ) -> Self {
        Self {
            config,
            storage,
            challenges,
            account: RwLock::new(None),
        }
    }

    /// The ACME directory URL this client talks to
    pub fn directory_url(&self) -> &'static str {
        if self.config.staging {
            LETS_ENCRYPT_STAGING
        } else {
            LETS_ENCRYPT_PRODUCTION
        }
    }

    /// Load or create the ACME account, memoizing it for later orders
    async fn ensure_account(&self) -> Result<Account, AcmeError> {
        if let Some(account) = self.account.read().clone() {
            return Ok(account);
        }

        // Try stored credentials first.
        if let Some(json) = self.storage.load_credentials()? {
            match self.account_from_credentials(&json).await {
                Ok(account) => {
                    info!("Loaded existing ACME account");
                    *self.account.write() = Some(account.clone());
                    return Ok(account);
                }
                Err(e) => {
                    warn!(error = %e, "Stored ACME credentials unusable; creating a new account");
                }
            }
        }

        let account = self.create_account().await?;
        *self.account.write() = Some(account.clone());
        Ok(account)
    }

    async fn account_from_credentials(&self, json: &str) -> Result<Account, AcmeError> {
        let credentials: instant_acme::AccountCredentials = serde_json::from_str(json)
            .map_err(|e| AcmeError::Account(format!("invalid credentials: {e}")))?;

        let account = Account::builder()
            .map_err(AcmeError::Acme)?
            .from_credentials(credentials)
            .await?;

        Ok(account)
    }

    async fn create_account(&self) -> Result<Account, AcmeError> {
        let contact = self.config.email.as_ref().map(|e| format!("mailto:{e}"));
        let contact_refs: Vec<&str> = contact.as_deref().into_iter().collect();

        // Terms of service are accepted automatically; there is no
        // interactive confirmation path in a proxy process.
        let new_account = NewAccount {
            contact: &contact_refs,
            terms_of_service_agreed: true,
            only_return_existing: false,
        };

        let (account, credentials) = Account::builder()
            .map_err(AcmeError::Acme)?
            .create(&new_account, self.directory_url().to_string(), None)
            .await?;

        let credentials_json = serde_json::to_string_pretty(&credentials)
            .map_err(|e| AcmeError::Account(format!("failed to serialize credentials: {e}")))?;
        self.storage.save_credentials(&credentials_json)?;

        info!(
            staging = self.config.staging,
            id = %account.id(),
            "Created new ACME account"
        );

        Ok(account)
    }

    /// Obtain a certificate for `host` via an HTTP-01 order
    ///
    /// The issued certificate is persisted to storage before returning.
    pub async fn obtain(&self, host: &str) -> Result<IssuedCertificate, AcmeError> {
        if host.is_empty() || host.contains('/') || host.starts_with('.') {
            return Err(AcmeError::InvalidDomain(host.to_string()));
        }

        let account = self.ensure_account().await?;

        info!(host = %host, directory = self.directory_url(), "Requesting certificate");

        let identifiers = [Identifier::Dns(host.to_string())];
        let mut order = account.new_order(&NewOrder::new(&identifiers)).await?;

        // Tokens published for this order, removed again on every exit path.
        let mut published_tokens: Vec<String> = Vec::new();
        let result = self
            .drive_order(&mut order, host, &mut published_tokens)
            .await;
        for token in &published_tokens {
            self.challenges.remove(token);
        }

        result
    }

    async fn drive_order(
        &self,
        order: &mut instant_acme::Order,
        host: &str,
        published_tokens: &mut Vec<String>,
    ) -> Result<IssuedCertificate, AcmeError> {
        let mut authorizations = order.authorizations();
        while let Some(auth_result) = authorizations.next().await {
            let mut auth = auth_result?;

            match auth.status {
                AuthorizationStatus::Pending => {
                    let mut challenge = auth
                        .challenge(ChallengeType::Http01)
                        .ok_or_else(|| AcmeError::NoHttp01Challenge(host.to_string()))?;

                    let key_authorization = challenge.key_authorization();
                    let token = challenge.token.clone();

                    self.challenges.insert(&token, key_authorization.as_str());
                    published_tokens.push(token.clone());

                    debug!(
                        host = %host,
                        token = %token,
                        "HTTP-01 challenge ready to serve"
                    );

                    challenge.set_ready().await?;
                }
                AuthorizationStatus::Valid => {
                    debug!(host = %host, "Authorization already valid");
                }
                status => {
                    return Err(AcmeError::ChallengeFailed(format!(
                        "unexpected authorization status: {status:?}"
                    )));
                }
            }
        }

        let retry_policy = RetryPolicy::new().timeout(ORDER_TIMEOUT);

        match order.poll_ready(&retry_policy).await? {
            OrderStatus::Ready => debug!(host = %host, "Order ready; finalizing"),
            OrderStatus::Invalid => {
                return Err(AcmeError::ChallengeFailed("order became invalid".to_string()));
            }
            status => {
                return Err(AcmeError::OrderNotReady(format!("{status:?}")));
            }
        }

        // finalize() generates the key pair and CSR internally and returns
        // the private key PEM.
        let key_pem = order.finalize().await?;
        let cert_pem = order.poll_certificate(&retry_policy).await?;

        let expires = parse_cert_expiry(&cert_pem).unwrap_or_else(|| {
            warn!(host = %host, "Could not parse certificate expiry; assuming 60 days");
            Utc::now() + chrono::Duration::days(60)
        });

        self.storage
            .save_certificate(host, &cert_pem, &key_pem, expires)?;

        info!(host = %host, expires = %expires, "Certificate issued");

        Ok(IssuedCertificate {
            cert_pem,
            key_pem,
            expires,
        })
    }
}

/// Extract the leaf certificate's notAfter from a PEM chain
fn parse_cert_expiry(pem_chain: &str) -> Option<DateTime<Utc>> {
    use x509_parser::prelude::*;

    for pem in Pem::iter_from_buffer(pem_chain.as_bytes()).flatten() {
        if pem.label != "CERTIFICATE" {
            continue;
        }
        if let Ok((_, cert)) = parse_x509_certificate(&pem.contents) {
            return DateTime::<Utc>::from_timestamp(cert.validity().not_after.timestamp(), 0);
        }
    }

    None
}
