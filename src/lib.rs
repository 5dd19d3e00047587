// ============================================================================
// ArchiveDB Library
// ============================================================================

pub mod aggregation;
pub mod codec;
pub mod config;
pub mod core;
pub mod query;
pub mod storage;
pub mod stream;

// Re-export main types for convenience
pub use aggregation::{AggregationEngine, DimensionFailure, EventOutcome};
pub use codec::{AggregateKey, KEY_SEPARATOR};
pub use config::{StoreConfig, StoreEndpoint};
pub use crate::core::{
    AggregateRecord, ArchiveError, Dimensions, EntityId, LifecycleEvent, MemberDelta, MemberOp, Result,
};
pub use query::{
    ArchiveQueryService, ArchiveRequest, ArchiveResponse, DimensionDetail, DimensionSummary, MonthArchive,
    YearArchive,
};
pub use storage::{AggregateStore, DurabilityMode, InMemoryAggregateStore, QueryOptions};
pub use stream::{BatchReport, StreamAdapter, StreamBatch, StreamRecord};

// ============================================================================
// High-level Archive API
// ============================================================================

/// Write side and read side over one shared store handle
///
/// This is the recommended entry point for request handlers: build it once
/// at startup and share it behind an `Arc`.
///
/// # Examples
///
/// ```
/// use archivedb::{Archive, Dimensions, LifecycleEvent, StoreConfig};
///
/// # #[tokio::main]
/// # async fn main() -> archivedb::Result<()> {
/// let archive = Archive::open(&StoreConfig::new("aggregates", "aggregates-type"))?;
///
/// let mut dimensions = Dimensions::new();
/// dimensions.insert("month".to_string(), "2020-05".to_string());
/// archive.engine().apply(&LifecycleEvent::inserted("article-1", dimensions)).await;
///
/// let months = archive.queries().list_dimension_values("month").await?;
/// assert_eq!(months[0].value, "2020-05");
/// # Ok(())
/// # }
/// ```
pub struct Archive {
    store: std::sync::Arc<InMemoryAggregateStore>,
    engine: AggregationEngine,
    queries: ArchiveQueryService,
}

impl Archive {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let store = config.open_store()?;
        Ok(Self {
            engine: config.engine(store.clone()),
            queries: ArchiveQueryService::new(store.clone()),
            store,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::open(&StoreConfig::from_env()?)
    }

    pub fn engine(&self) -> &AggregationEngine {
        &self.engine
    }

    pub fn queries(&self) -> &ArchiveQueryService {
        &self.queries
    }

    pub fn store(&self) -> &std::sync::Arc<InMemoryAggregateStore> {
        &self.store
    }

    pub async fn process(&self, batch: StreamBatch) -> BatchReport {
        StreamAdapter::new(&self.engine).process(batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_archive_round_trip() {
        let archive = Archive::open(&StoreConfig::new("aggregates", "aggregates-type")).unwrap();
        let batch = StreamBatch::from_json(
            r#"{"Records":[{"eventName":"INSERT","NewImage":{"id":"a1","aggregates":{"year":"2020"}}}]}"#,
        )
        .unwrap();

        let report = archive.process(batch).await;
        assert_eq!(report.applied(), 1);

        let detail = archive.queries().get_dimension("year", "2020").await.unwrap().unwrap();
        assert_eq!(detail.member_ids, vec!["a1".to_string()]);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        assert!(Archive::open(&StoreConfig::new("", "idx")).is_err());
    }
}
