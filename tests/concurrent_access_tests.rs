/// Concurrent access tests
///
/// Many request handlers sharing one store handle
/// Run with: cargo test --test concurrent_access_tests
mod common;

use archivedb::codec;
use archivedb::{AggregateStore, AggregationEngine, ArchiveQueryService, InMemoryAggregateStore, LifecycleEvent};
use common::dims;
use std::sync::Arc;
use tokio::sync::Barrier;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inserts_same_month() {
    let store = Arc::new(InMemoryAggregateStore::new());
    let engine = Arc::new(AggregationEngine::new(store.clone()));
    let num_tasks = 8;
    let events_per_task = 25;
    let barrier = Arc::new(Barrier::new(num_tasks));

    let mut handles = vec![];
    for task_id in 0..num_tasks {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            for i in 0..events_per_task {
                let id = format!("task{}-{}", task_id, i);
                let outcome = engine
                    .apply(&LifecycleEvent::inserted(id, dims(&[("month", "2020-05")])))
                    .await;
                assert!(outcome.is_success());
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let record = store.get(&codec::encode("month", "2020-05").unwrap()).await.unwrap().unwrap();
    assert_eq!(record.count as usize, num_tasks * events_per_task);
    assert!(record.is_consistent());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_delivery_from_parallel_consumers() {
    let store = Arc::new(InMemoryAggregateStore::new());
    let engine = Arc::new(AggregationEngine::new(store.clone()));
    let batch: Vec<_> = (0..40)
        .map(|i| {
            let id = uuid::Uuid::new_v4().to_string();
            let year = if i % 2 == 0 { "2020" } else { "2021" };
            LifecycleEvent::inserted(id, dims(&[("year", year)]))
        })
        .collect();
    let batch = Arc::new(batch);

    // Same batch delivered to four consumers at once
    let mut handles = vec![];
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        let batch = Arc::clone(&batch);
        handles.push(tokio::spawn(async move { engine.apply_batch(&batch).await }));
    }
    for handle in handles {
        let outcomes = handle.await.unwrap();
        assert!(outcomes.iter().all(|o| o.is_success()));
    }

    let queries = ArchiveQueryService::new(store);
    let years = queries.list_dimension_values("year").await.unwrap();
    assert_eq!(years.len(), 2);
    assert!(years.iter().all(|y| y.count == 20));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reads_during_writes_always_see_consistent_records() {
    let store = Arc::new(InMemoryAggregateStore::new());
    let engine = Arc::new(AggregationEngine::new(store.clone()));
    let queries = Arc::new(ArchiveQueryService::new(store.clone()));

    let writer = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            for i in 0..200 {
                let tags = dims(&[("month", "2020-07")]);
                let id = format!("a{}", i % 10);
                let event = if i % 3 == 0 {
                    LifecycleEvent::removed(id, tags)
                } else {
                    LifecycleEvent::inserted(id, tags)
                };
                engine.apply(&event).await;
            }
        })
    };

    let reader = {
        let queries = Arc::clone(&queries);
        tokio::spawn(async move {
            for _ in 0..200 {
                for summary in queries.list_dimension_values_unfiltered("month").await.unwrap() {
                    assert_eq!(summary.count as usize, summary.member_ids.len());
                }
            }
        })
    };

    writer.await.unwrap();
    reader.await.unwrap();
}
