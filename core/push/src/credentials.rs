//! Credential provider consumed by the push engine.
//!
//! The login flow itself lives outside this crate; it writes a credential
//! file that `StoredCredentials` reads. The push engine only ever consumes
//! the trait, so tests and alternative flows can inject their own provider.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use meterlog_common::{Error, Result, UserId};

/// Access credential consumed by the push session controller.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Whether a usable (non-expired) credential is available.
    async fn is_authenticated(&self) -> bool;

    /// Bearer token for API requests.
    async fn access_token(&self) -> Result<String>;

    /// The authenticated user's id, which seeds the identifier namespace.
    async fn user_id(&self) -> Result<UserId>;
}

/// Stored credential with expiration tracking, as written by the login flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Access token for API requests.
    pub access_token: String,
    /// Server-assigned id of the authenticated user.
    pub user_id: String,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Check if the token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        // Consider expired if less than 5 minutes remaining
        self.expires_at < Utc::now() + Duration::minutes(5)
    }
}

/// File-backed credential provider.
pub struct StoredCredentials {
    credential: Option<Credential>,
}

impl StoredCredentials {
    /// Default credential file location.
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Precondition("No config directory available".to_string()))?;
        Ok(config_dir.join("meterlog").join("credentials.json"))
    }

    /// Load the credential file; a missing file means not authenticated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self { credential: None });
        }

        let raw = std::fs::read_to_string(path)?;
        let credential: Credential = serde_json::from_str(&raw)
            .map_err(|e| Error::Serialization(format!("Invalid credential file: {}", e)))?;
        Ok(Self {
            credential: Some(credential),
        })
    }

    /// Load from the default location.
    pub fn load_default() -> Result<Self> {
        Self::load(Self::default_path()?)
    }

    /// Construct from an already-loaded credential.
    pub fn from_credential(credential: Credential) -> Self {
        Self {
            credential: Some(credential),
        }
    }
}

#[async_trait]
impl CredentialProvider for StoredCredentials {
    async fn is_authenticated(&self) -> bool {
        self.credential.as_ref().is_some_and(|c| !c.is_expired())
    }

    async fn access_token(&self) -> Result<String> {
        match &self.credential {
            Some(c) if !c.is_expired() => Ok(c.access_token.clone()),
            Some(_) => Err(Error::Authentication(
                "Stored credential has expired".to_string(),
            )),
            None => Err(Error::Precondition(
                "No stored credential found".to_string(),
            )),
        }
    }

    async fn user_id(&self) -> Result<UserId> {
        match &self.credential {
            Some(c) => UserId::new(c.user_id.clone()),
            None => Err(Error::Precondition(
                "No stored credential found".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(expires_in: Duration) -> Credential {
        Credential {
            access_token: "token-abc".to_string(),
            user_id: "user-1".to_string(),
            expires_at: Utc::now() + expires_in,
        }
    }

    #[test]
    fn test_credential_expiration() {
        assert!(credential(Duration::hours(-1)).is_expired());
        assert!(!credential(Duration::hours(1)).is_expired());
        // 4 minutes remaining is within the 5 minute buffer
        assert!(credential(Duration::minutes(4)).is_expired());
    }

    #[tokio::test]
    async fn test_missing_file_is_not_authenticated() {
        let dir = tempfile::tempdir().unwrap();
        let provider = StoredCredentials::load(dir.path().join("credentials.json")).unwrap();
        assert!(!provider.is_authenticated().await);
        assert!(matches!(
            provider.access_token().await,
            Err(Error::Precondition(_))
        ));
    }

    #[tokio::test]
    async fn test_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let stored = credential(Duration::hours(1));
        std::fs::write(&path, serde_json::to_string(&stored).unwrap()).unwrap();

        let provider = StoredCredentials::load(&path).unwrap();
        assert!(provider.is_authenticated().await);
        assert_eq!(provider.access_token().await.unwrap(), "token-abc");
        assert_eq!(provider.user_id().await.unwrap().as_str(), "user-1");
    }

    #[tokio::test]
    async fn test_expired_credential_rejected() {
        let provider = StoredCredentials::from_credential(credential(Duration::minutes(-10)));
        assert!(!provider.is_authenticated().await);
        assert!(matches!(
            provider.access_token().await,
            Err(Error::Authentication(_))
        ));
    }
}
