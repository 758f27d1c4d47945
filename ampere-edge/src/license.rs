use async_trait::async_trait;
use jiff::Timestamp;
use thiserror::Error;
use tracing::info;

use crate::storage::EdgeStore;

#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("empty license token")]
    EmptyToken,
    #[error("license store error: {0}")]
    Store(Box<dyn std::error::Error + Send + Sync>),
}

/// Applies and revokes the cabinet's license. Token signature checks belong
/// to the license authority that issued it.
#[async_trait]
pub trait LicenseService: Send + Sync + 'static {
    async fn apply(&self, token: &str) -> Result<(), LicenseError>;

    /// Returns whether an active license was revoked.
    async fn revoke(&self) -> Result<bool, LicenseError>;
}

/// License service persisting into the edge store.
#[derive(Clone)]
pub struct StoredLicense<S> {
    store: S,
}

impl<S: EdgeStore> StoredLicense<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: EdgeStore> LicenseService for StoredLicense<S> {
    async fn apply(&self, token: &str) -> Result<(), LicenseError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(LicenseError::EmptyToken);
        }

        let current = self
            .store
            .current_license()
            .await
            .map_err(|e| LicenseError::Store(Box::new(e)))?;

        // Redelivered pushes of the active token leave applied_at untouched.
        if let Some(current) = current
            && current.is_active()
            && current.token == token
        {
            info!("License already active");
            return Ok(());
        }

        self.store
            .store_license(token, Timestamp::now())
            .await
            .map_err(|e| LicenseError::Store(Box::new(e)))?;

        info!("License applied");
        Ok(())
    }

    async fn revoke(&self) -> Result<bool, LicenseError> {
        let revoked = self
            .store
            .revoke_license(Timestamp::now())
            .await
            .map_err(|e| LicenseError::Store(Box::new(e)))?;

        info!(revoked, "License revocation processed");
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    #[tokio::test]
    async fn rejects_empty_token() {
        let license = StoredLicense::new(MemoryStore::new());
        assert!(matches!(
            license.apply("   ").await,
            Err(LicenseError::EmptyToken)
        ));
    }

    #[tokio::test]
    async fn reapplying_active_token_is_idempotent() {
        let store = MemoryStore::new();
        let license = StoredLicense::new(store.clone());

        license.apply("LIC-123").await.unwrap();
        let first = store.current_license().await.unwrap().unwrap();
        license.apply("LIC-123").await.unwrap();
        let second = store.current_license().await.unwrap().unwrap();

        assert_eq!(first.applied_at, second.applied_at);
    }

    #[tokio::test]
    async fn revoke_then_reapply() {
        let store = MemoryStore::new();
        let license = StoredLicense::new(store.clone());

        license.apply("LIC-123").await.unwrap();
        assert!(license.revoke().await.unwrap());
        assert!(!license.revoke().await.unwrap());
        assert!(!store.current_license().await.unwrap().unwrap().is_active());

        license.apply("LIC-123").await.unwrap();
        assert!(store.current_license().await.unwrap().unwrap().is_active());
    }
}
