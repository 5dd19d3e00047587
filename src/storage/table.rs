use crate::codec::{self, AggregateKey};
use crate::core::{AggregateRecord, ArchiveError, MemberDelta, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Keyed aggregate records plus the secondary index by dimension type.
///
/// Mutation is split into [`AggregateTable::preview_merge`] and
/// [`AggregateTable::commit`] so a caller can make the merged record durable
/// before it becomes visible.
#[derive(Debug, Clone, Default)]
pub struct AggregateTable {
    records: BTreeMap<AggregateKey, AggregateRecord>,
    type_index: HashMap<String, BTreeSet<AggregateKey>>,
}

impl AggregateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = AggregateRecord>) -> Self {
        let mut table = Self::new();
        for record in records {
            table.commit(record);
        }
        table
    }

    /// Computes the post-merge record without touching the table.
    pub fn preview_merge(
        &self,
        key: &AggregateKey,
        dimension_type: &str,
        delta: &MemberDelta,
    ) -> Result<AggregateRecord> {
        codec::validate_dimension_type(dimension_type)?;
        let (key_type, _) = codec::decode(key)?;
        if key_type != dimension_type {
            return Err(ArchiveError::InvalidDimension(format!(
                "key '{}' does not belong to dimension type '{}'",
                key, dimension_type
            )));
        }

        let mut record = self
            .records
            .get(key)
            .cloned()
            .unwrap_or_else(|| AggregateRecord::new(key.clone(), dimension_type));
        record.apply(delta);
        Ok(record)
    }

    /// Stores `record`, re-deriving `count` from its member set.
    pub fn commit(&mut self, mut record: AggregateRecord) {
        record.count = record.members.len() as u64;
        self.type_index
            .entry(record.dimension_type.clone())
            .or_default()
            .insert(record.key.clone());
        self.records.insert(record.key.clone(), record);
    }

    pub fn get(&self, key: &AggregateKey) -> Option<&AggregateRecord> {
        self.records.get(key)
    }

    pub fn scan_type_desc(&self, dimension_type: &str, only_positive_count: bool) -> Vec<AggregateRecord> {
        let Some(keys) = self.type_index.get(dimension_type) else {
            return Vec::new();
        };

        keys.iter()
            .rev()
            .filter_map(|key| self.records.get(key))
            .filter(|record| !only_positive_count || record.count > 0)
            .cloned()
            .collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &AggregateRecord> {
        self.records.values()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}
