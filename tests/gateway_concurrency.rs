use price_tracker::tracker::domain::ExtractionRecord;
use price_tracker::tracker::persistence::{MemoryStore, PriceStore, PriceStoreGateway};
use std::sync::Arc;

#[tokio::test]
async fn test_identical_batches_never_duplicate_resources() {
    let store = Arc::new(MemoryStore::new());
    let gateway = PriceStoreGateway::new(store.clone());
    let batch = vec![
        ExtractionRecord::new("Aluminite", "Alliage", 270),
        ExtractionRecord::new("Pyrite", "Alliage", 14862),
    ];

    let first = gateway.upsert_and_record(&batch).await;
    let second = gateway.upsert_and_record(&batch).await;

    assert_eq!(first.created_resources(), 2);
    assert_eq!(second.created_resources(), 0);
    assert_eq!(store.resource_count(), 2);
    // Repeated prices are legitimate repeated observations.
    assert_eq!(store.observation_count(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_sightings_create_one_resource() {
    const WORKERS: i64 = 16;

    let store = Arc::new(MemoryStore::new());
    let gateway = PriceStoreGateway::new(store.clone());

    let mut handles = Vec::new();
    for i in 0..WORKERS {
        let gateway = gateway.clone();
        handles.push(tokio::spawn(async move {
            gateway
                .upsert_and_record(&[ExtractionRecord::new("Tritium", "Gaz", 1000 + i)])
                .await
        }));
    }

    let mut created = 0;
    for handle in handles {
        let report = handle.await.unwrap();
        assert!(report.is_complete());
        created += report.created_resources();
    }

    assert_eq!(created, 1);
    assert_eq!(store.resource_count(), 1);

    let resource = store.find_resource("Tritium").await.unwrap().unwrap();
    let series = store.observations_for(&resource.id).await.unwrap();
    assert_eq!(series.len(), WORKERS as usize);
    let mut values: Vec<_> = series.iter().map(|o| o.value).collect();
    values.sort_unstable();
    assert_eq!(values, (1000..1000 + WORKERS).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_category_of_first_sighting_wins() {
    let store = Arc::new(MemoryStore::new());
    let gateway = PriceStoreGateway::new(store.clone());

    gateway
        .upsert_and_record(&[ExtractionRecord::new("Rutile", "Minerai", 10)])
        .await;
    gateway
        .upsert_and_record(&[ExtractionRecord::new("Rutile", "Alliage", 12)])
        .await;

    let resource = store.find_resource("Rutile").await.unwrap().unwrap();
    assert_eq!(resource.category, "Minerai");
    assert_eq!(store.observations_for(&resource.id).await.unwrap().len(), 2);
}
