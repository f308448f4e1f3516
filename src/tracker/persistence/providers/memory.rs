//! Process-local [`PriceStore`], used for dry runs and tests.

use crate::tracker::domain::{PriceObservation, Resource};
use crate::tracker::persistence::{PriceStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Default)]
struct State {
    /// Keyed by name, which doubles as the uniqueness constraint.
    resources: HashMap<String, Resource>,
    observations: Vec<PriceObservation>,
}

/// In-memory store with the same uniqueness semantics as the real backends.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All resources, in no particular order.
    pub fn resources(&self) -> Vec<Resource> {
        self.read().resources.values().cloned().collect()
    }

    pub fn resource_count(&self) -> usize {
        self.read().resources.len()
    }

    pub fn observation_count(&self) -> usize {
        self.read().observations.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl PriceStore for MemoryStore {
    async fn find_resource(&self, name: &str) -> Result<Option<Resource>, StoreError> {
        Ok(self.read().resources.get(name).cloned())
    }

    async fn insert_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        let mut state = self.write();
        if state.resources.contains_key(&resource.name) {
            return Err(StoreError::Conflict(format!(
                "resource name `{}` already exists",
                resource.name
            )));
        }
        state
            .resources
            .insert(resource.name.clone(), resource.clone());
        Ok(())
    }

    async fn append_observation(&self, observation: &PriceObservation) -> Result<(), StoreError> {
        self.write().observations.push(observation.clone());
        Ok(())
    }

    async fn observations_for(
        &self,
        resource_id: &str,
    ) -> Result<Vec<PriceObservation>, StoreError> {
        let mut series: Vec<_> = self
            .read()
            .observations
            .iter()
            .filter(|o| o.resource_id == resource_id)
            .cloned()
            .collect();
        series.sort_by_key(|o| o.observed_at);
        Ok(series)
    }
}
