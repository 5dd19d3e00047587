use crate::codec::AggregateKey;
use crate::core::{AggregateRecord, EntityId, MemberDelta, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Skip soft-zero records (`count == 0`).
    pub only_positive_count: bool,
}

impl QueryOptions {
    pub fn positive() -> Self {
        Self {
            only_positive_count: true,
        }
    }

    pub fn all() -> Self {
        Self {
            only_positive_count: false,
        }
    }
}

/// Storage backend for aggregate records - allows pluggable stores
///
/// Implementations must make `upsert_merge` atomic per key: concurrent merges
/// against one key are serialized and none of them is lost. No ordering is
/// promised across distinct keys.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Create-if-absent, apply `delta` to the member set and recompute the
    /// count, all in one transaction. Returns the post-merge record.
    async fn upsert_merge(
        &self,
        key: &AggregateKey,
        dimension_type: &str,
        delta: MemberDelta,
    ) -> Result<AggregateRecord>;

    async fn get(&self, key: &AggregateKey) -> Result<Option<AggregateRecord>>;

    /// Records of one dimension type, key descending.
    async fn query_by_type(
        &self,
        dimension_type: &str,
        options: QueryOptions,
    ) -> Result<Vec<AggregateRecord>>;

    async fn bulk_resolve_members(&self, key: &AggregateKey) -> Result<BTreeSet<EntityId>> {
        Ok(self
            .get(key)
            .await?
            .map(|record| record.members)
            .unwrap_or_default())
    }
}
