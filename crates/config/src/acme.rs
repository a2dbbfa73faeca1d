//! ACME (automatic certificate) configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Domain-validation challenge kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeKind {
    /// HTTP-01: the CA fetches `/.well-known/acme-challenge/<token>` over
    /// plain HTTP on the candidate hostname
    #[serde(rename = "http")]
    Http01,
}

impl ChallengeKind {
    /// Parse a challenge kind from its configuration spelling
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "http-01" => Some(Self::Http01),
            _ => None,
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http01 => write!(f, "http"),
        }
    }
}

/// Process-wide automatic certificate management configuration
///
/// Presence of this block enables on-demand certificate issuance for every
/// listener that declares `acme-hosts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeConfig {
    /// Directory for persisted certificates and account credentials
    pub cache_dir: PathBuf,
    /// Domain-validation challenge kind
    pub challenge: ChallengeKind,
    /// Bind address for the HTTP-01 challenge listener
    pub bind: String,
    /// Contact email for the ACME account
    #[serde(default)]
    pub email: Option<String>,
    /// Use the CA's staging environment (for testing)
    #[serde(default)]
    pub staging: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_kind_parses_known_spellings() {
        assert_eq!(ChallengeKind::parse("http"), Some(ChallengeKind::Http01));
        assert_eq!(ChallengeKind::parse("HTTP-01"), Some(ChallengeKind::Http01));
        assert_eq!(ChallengeKind::parse("dns"), None);
    }

    #[test]
    fn challenge_kind_display_round_trips() {
        let kind = ChallengeKind::Http01;
        assert_eq!(ChallengeKind::parse(&kind.to_string()), Some(kind));
    }
}
