use crate::tracker::domain::{PriceObservation, Resource};
use crate::tracker::persistence::{PriceStore, StoreError};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect};

/// Uniqueness of `resources.name` is enforced by the index, not by callers.
const SCHEMA: &str = "
    DEFINE TABLE IF NOT EXISTS resources SCHEMALESS;
    DEFINE INDEX IF NOT EXISTS resources_name_unique ON TABLE resources COLUMNS name UNIQUE;
    DEFINE TABLE IF NOT EXISTS price_observations SCHEMALESS;
    DEFINE INDEX IF NOT EXISTS price_observations_resource ON TABLE price_observations COLUMNS resource_id;
";

#[derive(Debug)]
pub struct SurrealDbStore {
    db: Surreal<Any>,
}

impl SurrealDbStore {
    pub async fn new(connection_string: &str, namespace: &str, database: &str) -> Result<Self> {
        let db = connect(connection_string).await?;
        db.use_ns(namespace).use_db(database).await?;
        db.query(SCHEMA).await?.check()?;

        Ok(Self { db })
    }
}

// Record ids are set to our own uuids; the uuid is also kept as a plain
// field so rows deserialize without going through `RecordId`.
#[derive(Debug, Serialize, Deserialize)]
struct ResourceRecord {
    resource_id: String,
    name: String,
    category: String,
    created_at: DateTime<Utc>,
}

impl From<ResourceRecord> for Resource {
    fn from(r: ResourceRecord) -> Self {
        Self {
            id: r.resource_id,
            name: r.name,
            category: r.category,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ObservationRecord {
    observation_id: String,
    resource_id: String,
    value: i64,
    observed_at: DateTime<Utc>,
}

impl From<ObservationRecord> for PriceObservation {
    fn from(r: ObservationRecord) -> Self {
        Self {
            id: r.observation_id,
            resource_id: r.resource_id,
            value: r.value,
            observed_at: r.observed_at,
        }
    }
}

fn map_error(err: surrealdb::Error) -> StoreError {
    let message = err.to_string();
    if message.contains("already contains") {
        StoreError::Conflict(message)
    } else if message.contains("can be retried") {
        StoreError::Contention(message)
    } else {
        StoreError::Backend(err.into())
    }
}

#[async_trait]
impl PriceStore for SurrealDbStore {
    async fn find_resource(&self, name: &str) -> Result<Option<Resource>, StoreError> {
        let sql = "SELECT resource_id, name, category, created_at FROM resources WHERE name = $name LIMIT 1";
        let mut response = self
            .db
            .query(sql)
            .bind(("name", name.to_string()))
            .await
            .map_err(map_error)?;
        let found: Option<ResourceRecord> = response.take(0).map_err(map_error)?;
        Ok(found.map(Resource::from))
    }

    async fn insert_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        let record = ResourceRecord {
            resource_id: resource.id.clone(),
            name: resource.name.clone(),
            category: resource.category.clone(),
            created_at: resource.created_at,
        };
        let _: Option<ResourceRecord> = self
            .db
            .create(("resources", resource.id.clone()))
            .content(record)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn append_observation(&self, observation: &PriceObservation) -> Result<(), StoreError> {
        let record = ObservationRecord {
            observation_id: observation.id.clone(),
            resource_id: observation.resource_id.clone(),
            value: observation.value,
            observed_at: observation.observed_at,
        };
        let _: Option<ObservationRecord> = self
            .db
            .create(("price_observations", observation.id.clone()))
            .content(record)
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn observations_for(
        &self,
        resource_id: &str,
    ) -> Result<Vec<PriceObservation>, StoreError> {
        let sql = "SELECT observation_id, resource_id, value, observed_at FROM price_observations WHERE resource_id = $rid";
        let mut response = self
            .db
            .query(sql)
            .bind(("rid", resource_id.to_string()))
            .await
            .map_err(map_error)?;
        let records: Vec<ObservationRecord> = response.take(0).map_err(map_error)?;

        let mut series: Vec<PriceObservation> =
            records.into_iter().map(PriceObservation::from).collect();
        series.sort_by_key(|o| o.observed_at);
        Ok(series)
    }
}
