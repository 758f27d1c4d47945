//! Bearer API key authentication for edge-facing routes.

use ampere_core::CabinetId;
use axum::http::{HeaderMap, header};
use thiserror::Error;

use crate::registry::models::Cabinet;
use crate::registry::{CabinetRegistry, RegistryError, boxed};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer API key")]
    MissingKey,
    #[error("unknown API key")]
    UnknownKey,
    #[error("API key does not belong to cabinet {0}")]
    WrongCabinet(CabinetId),
    #[error("registry error: {0}")]
    Registry(RegistryError),
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}

/// Resolves the calling cabinet from its API key.
pub async fn authenticate<C: CabinetRegistry>(
    cabinets: &C,
    headers: &HeaderMap,
) -> Result<Cabinet, AuthError> {
    let key = bearer(headers).ok_or(AuthError::MissingKey)?;

    cabinets
        .find_by_api_key(key)
        .await
        .map_err(|e| AuthError::Registry(boxed(e)))?
        .ok_or(AuthError::UnknownKey)
}

/// Like [`authenticate`], and the key must belong to `expected`.
pub async fn authorize<C: CabinetRegistry>(
    cabinets: &C,
    headers: &HeaderMap,
    expected: &CabinetId,
) -> Result<Cabinet, AuthError> {
    let cabinet = authenticate(cabinets, headers).await?;
    if &cabinet.id != expected {
        return Err(AuthError::WrongCabinet(expected.clone()));
    }
    Ok(cabinet)
}

/// 32 random alphanumeric characters.
pub fn generate_api_key() -> String {
    use rand::Rng;
    use rand::distr::Alphanumeric;

    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jiff::Timestamp;

    use crate::registry::memory::InMemoryCabinetRegistry;

    async fn registry() -> InMemoryCabinetRegistry {
        let registry = InMemoryCabinetRegistry::default();
        registry
            .register(Cabinet {
                id: "CAB-1".into(),
                name: None,
                api_key: "key-1".into(),
                location: None,
                ip_address: None,
                firmware_version: None,
                created_at: Timestamp::now(),
                last_sync_at: None,
            })
            .await
            .unwrap();
        registry
    }

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[tokio::test]
    async fn resolves_cabinet_from_key() {
        let registry = registry().await;
        let cabinet = authorize(&registry, &headers("Bearer key-1"), &"CAB-1".into())
            .await
            .unwrap();
        assert_eq!(cabinet.id.as_str(), "CAB-1");
    }

    #[tokio::test]
    async fn rejects_missing_unknown_and_foreign_keys() {
        let registry = registry().await;

        let err = authenticate(&registry, &HeaderMap::new()).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingKey));

        let err = authenticate(&registry, &headers("Basic key-1")).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingKey));

        let err = authenticate(&registry, &headers("Bearer key-2")).await.unwrap_err();
        assert!(matches!(err, AuthError::UnknownKey));

        let err = authorize(&registry, &headers("Bearer key-1"), &"CAB-2".into())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::WrongCabinet(_)));
    }

    #[test]
    fn generated_keys_are_distinct() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }
}
