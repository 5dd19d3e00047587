// ============================================================================
// Archive Query Service
// ============================================================================
//
// Read-only translation of "browse by dimension" questions into store reads.
// A missing record is an empty answer, not an error.
//
// ============================================================================

pub mod hierarchy;

pub use hierarchy::{MONTH_DIMENSION, MonthArchive, YearArchive, group_by_year};

use crate::codec;
use crate::core::{AggregateRecord, EntityId, Result};
use crate::storage::{AggregateStore, QueryOptions};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionSummary {
    pub value: String,
    pub count: u64,
    pub member_ids: Vec<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DimensionDetail {
    pub count: u64,
    pub member_ids: Vec<EntityId>,
}

impl From<AggregateRecord> for DimensionDetail {
    fn from(record: AggregateRecord) -> Self {
        Self {
            count: record.count,
            member_ids: record.members.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveRequest {
    All,
    Year(String),
    Month { year: String, month: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ArchiveResponse {
    Months(Vec<MonthArchive>),
    Month(Option<MonthArchive>),
}

pub struct ArchiveQueryService {
    store: Arc<dyn AggregateStore>,
}

impl ArchiveQueryService {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self { store }
    }

    /// Values of `dimension_type` with at least one member, newest key first.
    pub async fn list_dimension_values(&self, dimension_type: &str) -> Result<Vec<DimensionSummary>> {
        self.list(dimension_type, QueryOptions::positive()).await
    }

    /// Like [`Self::list_dimension_values`] but keeps soft-zero records.
    pub async fn list_dimension_values_unfiltered(
        &self,
        dimension_type: &str,
    ) -> Result<Vec<DimensionSummary>> {
        self.list(dimension_type, QueryOptions::all()).await
    }

    pub async fn get_dimension(
        &self,
        dimension_type: &str,
        dimension_value: &str,
    ) -> Result<Option<DimensionDetail>> {
        let key = codec::encode(dimension_type, dimension_value)?;
        Ok(self.store.get(&key).await?.map(DimensionDetail::from))
    }

    pub async fn archives(&self, request: ArchiveRequest) -> Result<ArchiveResponse> {
        match request {
            ArchiveRequest::All => Ok(ArchiveResponse::Months(self.months().await?)),
            ArchiveRequest::Year(year) => {
                let months = self
                    .months()
                    .await?
                    .into_iter()
                    .filter(|m| m.year == year)
                    .collect();
                Ok(ArchiveResponse::Months(months))
            }
            ArchiveRequest::Month { year, month } => {
                let value = hierarchy::month_value(&year, &month);
                let archive = self
                    .get_dimension(MONTH_DIMENSION, &value)
                    .await?
                    .map(|detail| MonthArchive {
                        year,
                        month,
                        count: detail.count,
                        member_ids: detail.member_ids,
                    });
                Ok(ArchiveResponse::Month(archive))
            }
        }
    }

    pub async fn year_archives(&self) -> Result<Vec<YearArchive>> {
        Ok(group_by_year(self.months().await?))
    }

    async fn months(&self) -> Result<Vec<MonthArchive>> {
        Ok(self
            .list_dimension_values(MONTH_DIMENSION)
            .await?
            .into_iter()
            .filter_map(MonthArchive::from_summary)
            .collect())
    }

    async fn list(&self, dimension_type: &str, options: QueryOptions) -> Result<Vec<DimensionSummary>> {
        codec::validate_dimension_type(dimension_type)?;
        let records = self.store.query_by_type(dimension_type, options).await?;

        records
            .into_iter()
            .map(|record| -> Result<DimensionSummary> {
                let (_, value) = record.key.decode()?;
                Ok(DimensionSummary {
                    value,
                    count: record.count,
                    member_ids: record.members.into_iter().collect(),
                })
            })
            .collect()
    }
}
