//! On-disk certificate cache.
//!
//! Persists issued certificates and the ACME account credentials under the
//! configured cache directory. The proxy defines no file format of its own
//! beyond this layout:
//!
//! ```text
//! cache-dir/
//! ├── credentials.json          # ACME account credentials (opaque JSON)
//! └── hosts/
//!     └── example.com/
//!         ├── fullchain.pem     # Certificate chain
//!         ├── privkey.pem       # Private key (0600)
//!         └── meta.json         # Expiry and issuance metadata
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use super::error::StorageError;

/// Metadata stored alongside an issued certificate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateMeta {
    /// When the certificate expires
    pub expires: DateTime<Utc>,
    /// When the certificate was issued
    pub issued: DateTime<Utc>,
    /// Hostname the certificate covers
    pub host: String,
}

/// A certificate loaded from the cache
#[derive(Debug, Clone)]
pub struct StoredCertificate {
    /// PEM-encoded certificate chain
    pub cert_pem: String,
    /// PEM-encoded private key
    pub key_pem: String,
    /// Expiry and issuance metadata
    pub meta: CertificateMeta,
}

impl StoredCertificate {
    /// Whether the certificate's recorded expiry has passed
    pub fn is_expired(&self) -> bool {
        self.meta.expires <= Utc::now()
    }
}

/// Filesystem-backed certificate and account store
#[derive(Debug)]
pub struct CertificateStorage {
    base_path: PathBuf,
}

impl CertificateStorage {
    /// Open (creating if needed) the store at `base_path`
    ///
    /// Directories are created with restrictive permissions (0700 on Unix)
    /// since they hold private keys and account credentials.
    pub fn new(base_path: &Path) -> Result<Self, StorageError> {
        let hosts_path = base_path.join("hosts");
        fs::create_dir_all(&hosts_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o700);
            fs::set_permissions(base_path, perms.clone())?;
            fs::set_permissions(&hosts_path, perms)?;
        }

        info!(
            cache_dir = %base_path.display(),
            "Initialized certificate cache"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    /// Base directory of the store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn host_path(&self, host: &str) -> PathBuf {
        self.base_path.join("hosts").join(host)
    }

    /// Load the ACME account credentials JSON, if present
    pub fn load_credentials(&self) -> Result<Option<String>, StorageError> {
        let path = self.base_path.join("credentials.json");
        if !path.exists() {
            trace!("No stored ACME account credentials");
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        debug!("Loaded ACME account credentials");
        Ok(Some(content))
    }

    /// Persist the ACME account credentials JSON
    pub fn save_credentials(&self, json: &str) -> Result<(), StorageError> {
        let path = self.base_path.join("credentials.json");
        fs::write(&path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        }

        info!("Saved ACME account credentials");
        Ok(())
    }

    /// Load the cached certificate for `host`, if present
    pub fn load_certificate(&self, host: &str) -> Result<Option<StoredCertificate>, StorageError> {
        let host_path = self.host_path(host);
        let cert_path = host_path.join("fullchain.pem");

        if !cert_path.exists() {
            trace!(host = %host, "No cached certificate");
            return Ok(None);
        }

        let cert_pem = fs::read_to_string(&cert_path)?;
        let key_pem = fs::read_to_string(host_path.join("privkey.pem"))?;
        let meta: CertificateMeta =
            serde_json::from_str(&fs::read_to_string(host_path.join("meta.json"))?)?;

        debug!(host = %host, expires = %meta.expires, "Loaded cached certificate");

        Ok(Some(StoredCertificate {
            cert_pem,
            key_pem,
            meta,
        }))
    }

    /// Persist an issued certificate for `host`
    pub fn save_certificate(
        &self,
        host: &str,
        cert_pem: &str,
        key_pem: &str,
        expires: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let host_path = self.host_path(host);
        fs::create_dir_all(&host_path)?;

        fs::write(host_path.join("fullchain.pem"), cert_pem)?;

        let key_path = host_path.join("privkey.pem");
        fs::write(&key_path, key_pem)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&key_path, fs::Permissions::from_mode(0o600))?;
        }

        let meta = CertificateMeta {
            expires,
            issued: Utc::now(),
            host: host.to_string(),
        };
        fs::write(
            host_path.join("meta.json"),
            serde_json::to_string_pretty(&meta)?,
        )?;

        info!(host = %host, expires = %expires, "Saved certificate to cache");
        Ok(())
    }
}
