//! Venue credential lookup.
//!
//! This module deliberately stops at reading a plaintext JSON credential
//! file. The encrypted-at-rest variant of that file (PBKDF2-HMAC-SHA256 key
//! derivation over a user passphrase, AES-128-CBC+HMAC authenticated
//! envelope) is consumed by a standalone CLI utility outside this crate; the
//! core only ever needs `CredentialStore::credentials_for`.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Credentials for one venue account, as stored in the credentials file.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiCredentials {
    /// Venue identifier, e.g. `"venue_a"` or `"venue_a_sandbox"`.
    pub ccxt_id: String,
    /// Optional label distinguishing multiple accounts on the same venue.
    pub owner: Option<String>,
    /// API key.
    pub api_key: String,
    /// API secret, base64-encoded where the venue requires it.
    pub api_secret: String,
    /// Passphrase, required by venues that issue one alongside the key pair.
    pub passphrase: Option<String>,
    /// Override for the venue's REST base URL, used to point at a sandbox.
    pub api_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CredentialFile {
    exchanges: Vec<ApiCredentials>,
}

/// Looks up venue credentials by venue id and, optionally, owner label.
pub trait CredentialStore: std::fmt::Debug + Send + Sync {
    /// Find credentials for `venue_id`, optionally narrowed by `owner` when
    /// more than one account is configured for the same venue.
    fn credentials_for(&self, venue_id: &str, owner: Option<&str>) -> Option<&ApiCredentials>;
}

/// A [`CredentialStore`] backed by a plaintext JSON file matching the shape
/// `{"exchanges": [{"ccxt_id", "owner", "api_key", "api_secret", "passphrase", "api_url"}]}`.
#[derive(Debug)]
pub struct JsonFileCredentialStore {
    by_venue: HashMap<String, Vec<ApiCredentials>>,
}

impl JsonFileCredentialStore {
    /// Load and parse the credential file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be read or does not match the
    /// expected JSON shape.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading credential file {:?}", path.as_ref()))?;
        Self::parse(&raw)
    }

    /// Parse credentials from an in-memory JSON string.
    ///
    /// # Errors
    ///
    /// Returns `Err` if `raw` does not match the expected JSON shape.
    pub fn parse(raw: &str) -> Result<Self> {
        let parsed: CredentialFile =
            serde_json::from_str(raw).context("parsing credential file JSON")?;

        let mut by_venue: HashMap<String, Vec<ApiCredentials>> = HashMap::new();
        for cred in parsed.exchanges {
            by_venue.entry(cred.ccxt_id.clone()).or_default().push(cred);
        }

        Ok(Self { by_venue })
    }
}

impl CredentialStore for JsonFileCredentialStore {
    fn credentials_for(&self, venue_id: &str, owner: Option<&str>) -> Option<&ApiCredentials> {
        let candidates = self.by_venue.get(venue_id)?;
        match owner {
            Some(owner) => candidates.iter().find(|c| c.owner.as_deref() == Some(owner)),
            None => candidates.first(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        {
            "exchanges": [
                {
                    "ccxt_id": "venue_a",
                    "api_key": "key-a",
                    "api_secret": "secret-a"
                },
                {
                    "ccxt_id": "venue_b",
                    "owner": "hedge",
                    "api_key": "key-b",
                    "api_secret": "secret-b",
                    "passphrase": "pp"
                }
            ]
        }
    "#;

    #[test]
    fn looks_up_by_venue_id() {
        let store = JsonFileCredentialStore::parse(SAMPLE).unwrap();
        let creds = store.credentials_for("venue_a", None).unwrap();
        assert_eq!(creds.api_key, "key-a");
    }

    #[test]
    fn looks_up_by_owner_when_given() {
        let store = JsonFileCredentialStore::parse(SAMPLE).unwrap();
        let creds = store.credentials_for("venue_b", Some("hedge")).unwrap();
        assert_eq!(creds.api_key, "key-b");
    }

    #[test]
    fn unknown_venue_returns_none() {
        let store = JsonFileCredentialStore::parse(SAMPLE).unwrap();
        assert!(store.credentials_for("venue_c", None).is_none());
    }
}
