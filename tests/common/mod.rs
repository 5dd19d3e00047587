#![allow(dead_code)]

use archivedb::{
    AggregateKey, AggregateRecord, AggregateStore, ArchiveError, Dimensions, InMemoryAggregateStore, MemberDelta,
    QueryOptions, Result,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn dims(pairs: &[(&str, &str)]) -> Dimensions {
    pairs.iter().map(|(t, v)| (t.to_string(), v.to_string())).collect()
}

/// Wraps an in-memory store and fails merges on demand, the way a store
/// behind a flaky network would.
pub struct FlakyStore {
    inner: InMemoryAggregateStore,
    failing_keys: Mutex<HashSet<String>>,
    fail_next: AtomicUsize,
    merges: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryAggregateStore::new(),
            failing_keys: Mutex::new(HashSet::new()),
            fail_next: AtomicUsize::new(0),
            merges: AtomicUsize::new(0),
        }
    }

    pub fn fail_key(&self, key: &str) {
        self.failing_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn heal(&self) {
        self.failing_keys.lock().unwrap().clear();
        self.fail_next.store(0, Ordering::SeqCst);
    }

    pub fn fail_next_merges(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn merge_calls(&self) -> usize {
        self.merges.load(Ordering::SeqCst)
    }

    fn should_fail(&self, key: &AggregateKey) -> bool {
        if self.failing_keys.lock().unwrap().contains(key.as_str()) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl AggregateStore for FlakyStore {
    async fn upsert_merge(
        &self,
        key: &AggregateKey,
        dimension_type: &str,
        delta: MemberDelta,
    ) -> Result<AggregateRecord> {
        self.merges.fetch_add(1, Ordering::SeqCst);
        if self.should_fail(key) {
            return Err(ArchiveError::StoreUnavailable(format!("connection reset merging '{}'", key)));
        }
        self.inner.upsert_merge(key, dimension_type, delta).await
    }

    async fn get(&self, key: &AggregateKey) -> Result<Option<AggregateRecord>> {
        self.inner.get(key).await
    }

    async fn query_by_type(&self, dimension_type: &str, options: QueryOptions) -> Result<Vec<AggregateRecord>> {
        self.inner.query_by_type(dimension_type, options).await
    }
}
