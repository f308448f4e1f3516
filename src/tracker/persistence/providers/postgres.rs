use crate::tracker::domain::{NewResource, PriceObservation, Resource};
use crate::tracker::persistence::{PriceStore, StoreError};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

const SCHEMA: [&str; 3] = [
    r"
    CREATE TABLE IF NOT EXISTS resources (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        category TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS price_observations (
        id TEXT PRIMARY KEY,
        resource_id TEXT NOT NULL REFERENCES resources (id),
        value BIGINT NOT NULL,
        observed_at TIMESTAMPTZ NOT NULL
    )
    ",
    r"
    CREATE INDEX IF NOT EXISTS price_observations_resource_idx
        ON price_observations (resource_id, observed_at)
    ",
];

#[derive(Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(connection_string: &str, database: &str) -> Result<Self> {
        let options = PgConnectOptions::from_str(connection_string)?.database(database);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self { pool })
    }
}

/// `serialization_failure` and `deadlock_detected`.
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

fn map_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::Conflict(db.message().to_string());
        }
        if db
            .code()
            .is_some_and(|code| RETRYABLE_SQLSTATES.contains(&code.as_ref()))
        {
            return StoreError::Contention(db.message().to_string());
        }
    }
    StoreError::Backend(err.into())
}

fn resource_from_row(row: &PgRow) -> Result<Resource, sqlx::Error> {
    Ok(Resource {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        category: row.try_get("category")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl PriceStore for PostgresStore {
    async fn find_resource(&self, name: &str) -> Result<Option<Resource>, StoreError> {
        let row = sqlx::query("SELECT id, name, category, created_at FROM resources WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_error)?;

        row.as_ref()
            .map(resource_from_row)
            .transpose()
            .map_err(map_error)
    }

    async fn insert_resource(&self, resource: &Resource) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO resources (id, name, category, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&resource.id)
        .bind(&resource.name)
        .bind(&resource.category)
        .bind(resource.created_at)
        .execute(&self.pool)
        .await
        .map_err(map_error)?;
        Ok(())
    }

    async fn append_observation(&self, observation: &PriceObservation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO price_observations (id, resource_id, value, observed_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&observation.id)
        .bind(&observation.resource_id)
        .bind(observation.value)
        .bind(observation.observed_at)
        .execute(&self.pool)
        .await
        .map_err(map_error)?;
        Ok(())
    }

    async fn observations_for(
        &self,
        resource_id: &str,
    ) -> Result<Vec<PriceObservation>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, resource_id, value, observed_at
            FROM price_observations
            WHERE resource_id = $1
            ORDER BY observed_at
            ",
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_error)?;

        rows.iter()
            .map(|row| {
                Ok(PriceObservation {
                    id: row.try_get("id")?,
                    resource_id: row.try_get("resource_id")?,
                    value: row.try_get("value")?,
                    observed_at: row.try_get("observed_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(map_error)
    }

    /// Single round-trip insert guarded by the `name` unique constraint;
    /// a losing writer falls through to the read.
    async fn get_or_create_resource(
        &self,
        new: &NewResource,
    ) -> Result<(Resource, bool), StoreError> {
        let candidate = Resource {
            id: Uuid::new_v4().to_string(),
            name: new.name.clone(),
            category: new.category.clone(),
            created_at: Utc::now(),
        };

        let inserted = sqlx::query(
            r"
            INSERT INTO resources (id, name, category, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO NOTHING
            RETURNING id
            ",
        )
        .bind(&candidate.id)
        .bind(&candidate.name)
        .bind(&candidate.category)
        .bind(candidate.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_error)?;

        if inserted.is_some() {
            return Ok((candidate, true));
        }

        self.find_resource(&new.name)
            .await?
            .map(|r| (r, false))
            .ok_or_else(|| StoreError::Vanished(new.name.clone()))
    }
}
