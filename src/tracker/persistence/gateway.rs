//! Batch upsert of parsed records into the price store.

use super::{PriceStore, StoreError};
use crate::tracker::domain::{ExtractionRecord, NewResource, PriceObservation};
use chrono::Utc;
use governor::Jitter;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Attempts per store operation when the backend reports contention.
const MAX_ATTEMPTS: u32 = 8;
const BACKOFF_BASE: Duration = Duration::from_millis(5);

/// What happened to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded {
        name: String,
        resource_id: String,
        observation_id: String,
        created_resource: bool,
    },
    Failed {
        name: String,
        price: i64,
        error: String,
    },
}

/// Per-record result of [`PriceStoreGateway::upsert_and_record`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub outcomes: Vec<RecordOutcome>,
}

impl UpsertReport {
    pub fn recorded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, RecordOutcome::Recorded { .. }))
            .count()
    }

    pub fn created_resources(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o,
                    RecordOutcome::Recorded {
                        created_resource: true,
                        ..
                    }
                )
            })
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecordOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, RecordOutcome::Failed { .. }))
    }

    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Looks up or creates each record's resource, then appends its price.
#[derive(Debug, Clone)]
pub struct PriceStoreGateway {
    store: Arc<dyn PriceStore>,
}

impl PriceStoreGateway {
    pub fn new(store: Arc<dyn PriceStore>) -> Self {
        Self { store }
    }

    /// Persist every record independently. A failing record is reported and
    /// does not undo or stop the others.
    pub async fn upsert_and_record(&self, records: &[ExtractionRecord]) -> UpsertReport {
        let mut report = UpsertReport::default();

        for record in records {
            let outcome = match self.record_one(record).await {
                Ok((resource_id, observation_id, created_resource)) => {
                    metrics::counter!("tracker_observations_recorded_total").increment(1);
                    RecordOutcome::Recorded {
                        name: record.name.clone(),
                        resource_id,
                        observation_id,
                        created_resource,
                    }
                }
                Err(e) => {
                    metrics::counter!("tracker_persist_failures_total").increment(1);
                    tracing::error!(
                        resource = %record.name,
                        value = record.price,
                        error = %e,
                        "Failed to persist price observation"
                    );
                    RecordOutcome::Failed {
                        name: record.name.clone(),
                        price: record.price,
                        error: e.to_string(),
                    }
                }
            };
            report.outcomes.push(outcome);
        }

        report
    }

    async fn record_one(
        &self,
        record: &ExtractionRecord,
    ) -> Result<(String, String, bool), StoreError> {
        let new = NewResource {
            name: record.name.clone(),
            category: record.category.clone(),
        };
        let (resource, created) =
            retry_contended("get_or_create_resource", || self.store.get_or_create_resource(&new))
                .await?;

        if created {
            tracing::info!(
                name: "store.resource.created",
                resource = %resource.name,
                category = %resource.category,
                "Created new resource"
            );
        }

        let observation = PriceObservation {
            id: Uuid::new_v4().to_string(),
            resource_id: resource.id.clone(),
            value: record.price,
            observed_at: Utc::now(),
        };
        retry_contended("append_observation", || self.store.append_observation(&observation))
            .await?;

        tracing::debug!(
            resource = %resource.name,
            value = observation.value,
            "Recorded price observation"
        );
        Ok((resource.id, observation.id, created))
    }
}

/// Run `op` again while the backend aborts it for contention, backing off
/// with jitter so racing writers spread out.
async fn retry_contended<T, F, Fut>(op: &'static str, mut f: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Err(StoreError::Contention(detail)) if attempt < MAX_ATTEMPTS => {
                let delay = Jitter::up_to(BACKOFF_BASE * 2u32.pow(attempt)) + BACKOFF_BASE;
                tracing::debug!(op, attempt, %detail, "Store contention; retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::domain::Resource;
    use crate::tracker::persistence::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Delegates to a memory store but refuses appends for one name.
    #[derive(Debug)]
    struct RefusingStore {
        inner: MemoryStore,
        refuse: String,
    }

    #[async_trait]
    impl PriceStore for RefusingStore {
        async fn find_resource(&self, name: &str) -> Result<Option<Resource>, StoreError> {
            self.inner.find_resource(name).await
        }

        async fn insert_resource(&self, resource: &Resource) -> Result<(), StoreError> {
            self.inner.insert_resource(resource).await
        }

        async fn append_observation(
            &self,
            observation: &PriceObservation,
        ) -> Result<(), StoreError> {
            let refused = self
                .inner
                .resources()
                .iter()
                .any(|r| r.id == observation.resource_id && r.name == self.refuse);
            if refused {
                return Err(StoreError::Backend(anyhow::anyhow!("disk full")));
            }
            self.inner.append_observation(observation).await
        }

        async fn observations_for(
            &self,
            resource_id: &str,
        ) -> Result<Vec<PriceObservation>, StoreError> {
            self.inner.observations_for(resource_id).await
        }
    }

    /// Reports contention for a set number of inserts and appends before
    /// delegating to a memory store.
    #[derive(Debug)]
    struct ContendedStore {
        inner: MemoryStore,
        insert_contentions: AtomicUsize,
        append_contentions: AtomicUsize,
    }

    impl ContendedStore {
        fn new(inserts: usize, appends: usize) -> Self {
            Self {
                inner: MemoryStore::new(),
                insert_contentions: AtomicUsize::new(inserts),
                append_contentions: AtomicUsize::new(appends),
            }
        }
    }

    fn take_one(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    #[async_trait]
    impl PriceStore for ContendedStore {
        async fn find_resource(&self, name: &str) -> Result<Option<Resource>, StoreError> {
            self.inner.find_resource(name).await
        }

        async fn insert_resource(&self, resource: &Resource) -> Result<(), StoreError> {
            if take_one(&self.insert_contentions) {
                return Err(StoreError::Contention("can be retried".to_string()));
            }
            self.inner.insert_resource(resource).await
        }

        async fn append_observation(
            &self,
            observation: &PriceObservation,
        ) -> Result<(), StoreError> {
            if take_one(&self.append_contentions) {
                return Err(StoreError::Contention("can be retried".to_string()));
            }
            self.inner.append_observation(observation).await
        }

        async fn observations_for(
            &self,
            resource_id: &str,
        ) -> Result<Vec<PriceObservation>, StoreError> {
            self.inner.observations_for(resource_id).await
        }
    }

    #[tokio::test]
    async fn test_contention_is_retried() {
        let store = Arc::new(ContendedStore::new(3, 2));
        let gateway = PriceStoreGateway::new(store.clone());

        let report = gateway
            .upsert_and_record(&[ExtractionRecord::new("Tritium", "Gaz", 1000)])
            .await;

        assert!(report.is_complete());
        assert_eq!(report.created_resources(), 1);
        assert_eq!(store.inner.resource_count(), 1);
        assert_eq!(store.inner.observation_count(), 1);
    }

    #[tokio::test]
    async fn test_endless_contention_fails_the_record() {
        let store = Arc::new(ContendedStore::new(usize::MAX, 0));
        let gateway = PriceStoreGateway::new(store.clone());

        let report = gateway
            .upsert_and_record(&[ExtractionRecord::new("Tritium", "Gaz", 1000)])
            .await;

        assert_eq!(report.recorded(), 0);
        assert!(matches!(
            report.failures().next(),
            Some(RecordOutcome::Failed { error, .. }) if error.contains("concurrent writer")
        ));
        assert_eq!(store.inner.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_records_and_reports() {
        let store = Arc::new(MemoryStore::new());
        let gateway = PriceStoreGateway::new(store.clone());

        let report = gateway
            .upsert_and_record(&[
                ExtractionRecord::new("Aluminite", "Alliage", 270),
                ExtractionRecord::new("Pyrite", "Alliage", 14862),
            ])
            .await;

        assert!(report.is_complete());
        assert_eq!(report.recorded(), 2);
        assert_eq!(report.created_resources(), 2);
        assert_eq!(store.resource_count(), 2);
        assert_eq!(store.observation_count(), 2);
    }

    #[tokio::test]
    async fn test_repeated_batch_reuses_resources() {
        let store = Arc::new(MemoryStore::new());
        let gateway = PriceStoreGateway::new(store.clone());
        let batch = [
            ExtractionRecord::new("Aluminite", "Alliage", 270),
            ExtractionRecord::new("Aluminite", "Alliage", 270),
        ];

        gateway.upsert_and_record(&batch).await;
        let second = gateway.upsert_and_record(&batch).await;

        assert_eq!(second.created_resources(), 0);
        assert_eq!(store.resource_count(), 1);
        assert_eq!(store.observation_count(), 4);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successes() {
        let store = Arc::new(RefusingStore {
            inner: MemoryStore::new(),
            refuse: "Pyrite".to_string(),
        });
        let gateway = PriceStoreGateway::new(store.clone());

        let report = gateway
            .upsert_and_record(&[
                ExtractionRecord::new("Aluminite", "Alliage", 270),
                ExtractionRecord::new("Pyrite", "Alliage", 14862),
                ExtractionRecord::new("Rutile", "Alliage", 10493),
            ])
            .await;

        assert!(!report.is_complete());
        assert_eq!(report.recorded(), 2);
        let failed: Vec<_> = report.failures().collect();
        assert_eq!(failed.len(), 1);
        assert!(matches!(
            failed[0],
            RecordOutcome::Failed { name, price: 14862, .. } if name == "Pyrite"
        ));
        assert_eq!(store.inner.observation_count(), 2);
    }
}
