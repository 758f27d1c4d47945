use ampere_core::{CabinetId, mask_api_key};
use jiff::Timestamp;
use serde::Serialize;
use tracing::{info, warn};

use crate::storage::EdgeStore;
use crate::storage::models::StoredCredentials;

/// What the edge presents to the control plane on every HTTP call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub cabinet_id: CabinetId,
    pub api_key: String,
    pub endpoint: String,
}

impl Credentials {
    /// Joins `path` onto the endpoint, tolerating a trailing slash.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }
}

impl From<StoredCredentials> for Credentials {
    fn from(stored: StoredCredentials) -> Self {
        Self {
            cabinet_id: stored.cabinet_id,
            api_key: stored.api_key,
            endpoint: stored.endpoint,
        }
    }
}

/// Credentials as the local API shows them.
#[derive(Debug, Clone, Serialize)]
pub struct MaskedCredentials {
    pub cabinet_id: CabinetId,
    pub api_key: String,
    pub endpoint: String,
    pub enabled: bool,
    pub source: &'static str,
}

/// Resolves the credentials to use right now. Stored rows win over the
/// static configuration, and are re-read on every call so a key rotated
/// through the local API takes effect on the next request.
#[derive(Clone)]
pub struct CredentialProvider<S> {
    store: S,
    fallback: Credentials,
}

impl<S: EdgeStore> CredentialProvider<S> {
    pub fn new(store: S, fallback: Credentials) -> Self {
        Self { store, fallback }
    }

    pub async fn current(&self) -> Credentials {
        match self.store.first_enabled_credentials().await {
            Ok(Some(stored)) => stored.into(),
            Ok(None) => self.fallback.clone(),
            Err(e) => {
                warn!(error = %e, "Failed to read stored credentials, using configuration");
                self.fallback.clone()
            }
        }
    }

    pub async fn masked(&self) -> Result<MaskedCredentials, S::Error> {
        let (credentials, enabled, source) = match self.store.first_enabled_credentials().await? {
            Some(stored) => (Credentials::from(stored), true, "store"),
            None => (self.fallback.clone(), true, "config"),
        };

        Ok(MaskedCredentials {
            cabinet_id: credentials.cabinet_id,
            api_key: mask_api_key(&credentials.api_key),
            endpoint: credentials.endpoint,
            enabled,
            source,
        })
    }

    /// Stores credentials for this cabinet, keeping the original creation time.
    pub async fn update(
        &self,
        api_key: String,
        endpoint: Option<String>,
        enabled: bool,
    ) -> Result<(), S::Error> {
        let cabinet_id = self.fallback.cabinet_id.clone();
        let now = Timestamp::now();
        let existing = self.store.credentials_for(&cabinet_id).await?;

        let endpoint = endpoint
            .or_else(|| existing.as_ref().map(|c| c.endpoint.clone()))
            .unwrap_or_else(|| self.fallback.endpoint.clone());
        let created_at = existing.map_or(now, |c| c.created_at);

        info!(
            cabinet_id = %cabinet_id,
            api_key = %mask_api_key(&api_key),
            endpoint = %endpoint,
            enabled,
            "Updating cloud credentials"
        );

        self.store
            .upsert_credentials(StoredCredentials {
                cabinet_id,
                api_key,
                endpoint,
                enabled,
                created_at,
                updated_at: now,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    fn fallback() -> Credentials {
        Credentials {
            cabinet_id: "CAB-1".into(),
            api_key: "config-key-0000".into(),
            endpoint: "http://cloud:8080/".into(),
        }
    }

    #[tokio::test]
    async fn falls_back_to_configuration() {
        let provider = CredentialProvider::new(MemoryStore::new(), fallback());
        assert_eq!(provider.current().await, fallback());
    }

    #[tokio::test]
    async fn stored_credentials_take_effect_immediately() {
        let provider = CredentialProvider::new(MemoryStore::new(), fallback());
        provider
            .update("rotated-key-1234".into(), None, true)
            .await
            .unwrap();

        let current = provider.current().await;
        assert_eq!(current.api_key, "rotated-key-1234");
        assert_eq!(current.endpoint, "http://cloud:8080/");
        assert_eq!(current.url("/cabinets/CAB-1/sync"), "http://cloud:8080/cabinets/CAB-1/sync");

        let masked = provider.masked().await.unwrap();
        assert_eq!(masked.api_key, "rota****1234");
        assert_eq!(masked.source, "store");
    }

    #[tokio::test]
    async fn disabled_row_is_ignored() {
        let provider = CredentialProvider::new(MemoryStore::new(), fallback());
        provider
            .update("rotated-key-1234".into(), None, false)
            .await
            .unwrap();

        assert_eq!(provider.current().await.api_key, "config-key-0000");
    }
}
