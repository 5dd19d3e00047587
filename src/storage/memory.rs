use super::engine::{AggregateStore, QueryOptions};
use super::persistence::{DurabilityMode, PersistenceManager, WalEntry};
use super::table::AggregateTable;
use crate::codec::AggregateKey;
use crate::core::{AggregateRecord, MemberDelta, Result};
use async_trait::async_trait;
use log::warn;
use std::path::Path;
use tokio::sync::{Mutex, RwLock};

/// Aggregate store backed by an in-process table, optionally made durable
/// by a WAL and snapshots.
///
/// Merges take the table write lock for their whole read-modify-write, which
/// serializes merges per key (and, as a side effect, across keys).
pub struct InMemoryAggregateStore {
    table: RwLock<AggregateTable>,
    persistence: Option<Mutex<PersistenceManager>>,
}

impl InMemoryAggregateStore {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(AggregateTable::new()),
            persistence: None,
        }
    }

    /// Open a durable store under `data_dir`, recovering any existing
    /// snapshot and WAL for `table`.
    pub fn open<P: AsRef<Path>>(
        data_dir: P,
        table: &str,
        type_index: &str,
        durability_mode: DurabilityMode,
        checkpoint_threshold: usize,
    ) -> Result<Self> {
        let mut persistence = PersistenceManager::new(data_dir, table, type_index, durability_mode)?;
        persistence.set_checkpoint_threshold(checkpoint_threshold);
        let recovered = persistence.recover()?;
        tracing::info!(
            table = %table,
            records = recovered.record_count(),
            "aggregate store recovered"
        );

        Ok(Self {
            table: RwLock::new(recovered),
            persistence: Some(Mutex::new(persistence)),
        })
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }

    /// Write a snapshot and truncate the WAL.
    pub async fn checkpoint(&self) -> Result<()> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let table = self.table.read().await;
        persistence.lock().await.checkpoint(&table)
    }

    pub async fn record_count(&self) -> usize {
        self.table.read().await.record_count()
    }
}

impl Default for InMemoryAggregateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AggregateStore for InMemoryAggregateStore {
    async fn upsert_merge(
        &self,
        key: &AggregateKey,
        dimension_type: &str,
        delta: MemberDelta,
    ) -> Result<AggregateRecord> {
        let mut table = self.table.write().await;
        let record = table.preview_merge(key, dimension_type, &delta)?;

        if let Some(persistence) = &self.persistence {
            let mut persistence = persistence.lock().await;
            // The table is untouched until the WAL accepts the frame. A
            // rejected frame is cut from the log as well.
            persistence.log(&WalEntry::merge(record.clone()))?;
            table.commit(record.clone());

            if persistence.needs_checkpoint()
                && let Err(err) = persistence.checkpoint(&table)
            {
                // The merge is already durable in the WAL; retry on the next merge.
                warn!("Checkpoint after merge of '{}' failed: {}", key, err);
            }
        } else {
            table.commit(record.clone());
        }

        Ok(record)
    }

    async fn get(&self, key: &AggregateKey) -> Result<Option<AggregateRecord>> {
        Ok(self.table.read().await.get(key).cloned())
    }

    async fn query_by_type(
        &self,
        dimension_type: &str,
        options: QueryOptions,
    ) -> Result<Vec<AggregateRecord>> {
        Ok(self
            .table
            .read()
            .await
            .scan_type_desc(dimension_type, options.only_positive_count))
    }
}
