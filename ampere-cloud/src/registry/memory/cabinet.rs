use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use ampere_core::{CabinetId, CabinetMetadata};
use async_trait::async_trait;
use jiff::Timestamp;
use tokio::sync::RwLock;

use crate::registry::CabinetRegistry;
use crate::registry::models::Cabinet;

#[derive(Clone, Default)]
pub struct InMemoryCabinetRegistry {
    cabinets: Arc<RwLock<HashMap<CabinetId, Cabinet>>>,
}

#[async_trait]
impl CabinetRegistry for InMemoryCabinetRegistry {
    type Error = Infallible;

    async fn register(&self, cabinet: Cabinet) -> Result<bool, Self::Error> {
        let mut cabinets = self.cabinets.write().await;
        if cabinets.contains_key(&cabinet.id) {
            return Ok(false);
        }
        cabinets.insert(cabinet.id.clone(), cabinet);
        Ok(true)
    }

    async fn get(&self, id: &CabinetId) -> Result<Option<Cabinet>, Self::Error> {
        let cabinets = self.cabinets.read().await;
        Ok(cabinets.get(id).cloned())
    }

    async fn find_by_api_key(&self, api_key: &str) -> Result<Option<Cabinet>, Self::Error> {
        let cabinets = self.cabinets.read().await;
        Ok(cabinets.values().find(|c| c.api_key == api_key).cloned())
    }

    async fn list(&self) -> Result<Vec<Cabinet>, Self::Error> {
        let cabinets = self.cabinets.read().await;
        let mut all: Vec<Cabinet> = cabinets.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn update_metadata(
        &self,
        id: &CabinetId,
        metadata: &CabinetMetadata,
    ) -> Result<bool, Self::Error> {
        let mut cabinets = self.cabinets.write().await;
        let Some(cabinet) = cabinets.get_mut(id) else {
            return Ok(false);
        };

        if let Some(name) = &metadata.name {
            cabinet.name = Some(name.clone());
        }
        if let Some(location) = &metadata.location {
            cabinet.location = Some(location.clone());
        }
        if let Some(ip) = &metadata.ip_address {
            cabinet.ip_address = Some(ip.clone());
        }
        if let Some(firmware) = &metadata.firmware_version {
            cabinet.firmware_version = Some(firmware.clone());
        }
        Ok(true)
    }

    async fn touch_sync(&self, id: &CabinetId, at: Timestamp) -> Result<(), Self::Error> {
        let mut cabinets = self.cabinets.write().await;
        if let Some(cabinet) = cabinets.get_mut(id) {
            cabinet.last_sync_at = Some(at);
        }
        Ok(())
    }
}
