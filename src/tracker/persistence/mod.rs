//! Price-history persistence.
//!
//! Two logical collections: `resources` (unique `name`) and
//! `price_observations` (append-only, keyed to a resource). Backends
//! implement [`PriceStore`]; [`PriceStoreGateway`] drives a parsed batch
//! into whichever store is configured.

use crate::config::{StoreConfig, StoreProvider};
use crate::tracker::domain::{NewResource, PriceObservation, Resource};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

mod gateway;
pub mod providers;

pub use gateway::{PriceStoreGateway, RecordOutcome, UpsertReport};
pub use providers::memory::MemoryStore;

/// Errors raised by a [`PriceStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique key is already taken.
    #[error("unique constraint violated: {0}")]
    Conflict(String),

    /// The backend aborted the transaction because of a concurrent writer.
    /// Running the same operation again may succeed.
    #[error("transaction conflicted with a concurrent writer: {0}")]
    Contention(String),

    /// A conflicting row was reported but could not be read back.
    #[error("resource `{0}` conflicted on insert but could not be found")]
    Vanished(String),

    /// Anything the backend reports that is not a conflict.
    #[error("store backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Minimal CRUD surface over the two collections.
#[async_trait]
pub trait PriceStore: Send + Sync + std::fmt::Debug {
    /// Exact-match lookup by name.
    async fn find_resource(&self, name: &str) -> Result<Option<Resource>, StoreError>;

    /// Insert a new resource. Fails with [`StoreError::Conflict`] when the
    /// name is already present.
    async fn insert_resource(&self, resource: &Resource) -> Result<(), StoreError>;

    /// Append one observation. Never fails because an identical value was
    /// observed before.
    async fn append_observation(&self, observation: &PriceObservation) -> Result<(), StoreError>;

    /// Time series for one resource, oldest first.
    async fn observations_for(&self, resource_id: &str)
    -> Result<Vec<PriceObservation>, StoreError>;

    /// Atomic get-or-create by name. Returns the resource and whether this
    /// call created it.
    ///
    /// The default relies on the backend's uniqueness constraint: on
    /// conflict another writer won, so its row is read back.
    async fn get_or_create_resource(
        &self,
        new: &NewResource,
    ) -> Result<(Resource, bool), StoreError> {
        if let Some(existing) = self.find_resource(&new.name).await? {
            return Ok((existing, false));
        }

        let candidate = Resource {
            id: Uuid::new_v4().to_string(),
            name: new.name.clone(),
            category: new.category.clone(),
            created_at: Utc::now(),
        };

        match self.insert_resource(&candidate).await {
            Ok(()) => Ok((candidate, true)),
            Err(StoreError::Conflict(_)) => self
                .find_resource(&new.name)
                .await?
                .map(|r| (r, false))
                .ok_or_else(|| StoreError::Vanished(new.name.clone())),
            Err(e) => Err(e),
        }
    }
}

/// Connect to the configured backend.
pub async fn connect(config: &StoreConfig) -> anyhow::Result<Arc<dyn PriceStore>> {
    match config.provider {
        StoreProvider::Memory => {
            tracing::warn!("Using in-memory price store; nothing survives a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreProvider::Surreal => {
            let store = providers::surreal::SurrealDbStore::new(
                &config.url,
                &config.namespace,
                &config.database,
            )
            .await?;
            tracing::info!(url = %config.url, database = %config.database, "Connected to SurrealDB");
            Ok(Arc::new(store))
        }
        StoreProvider::Postgres => {
            let store =
                providers::postgres::PostgresStore::new(&config.url, &config.database).await?;
            tracing::info!(database = %config.database, "Connected to Postgres");
            Ok(Arc::new(store))
        }
    }
}
