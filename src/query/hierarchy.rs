//! Year → month reshaping of `month` dimension values (`YYYY-MM`).

use super::DimensionSummary;
use crate::core::EntityId;
use serde::Serialize;
use std::collections::BTreeMap;

pub const MONTH_DIMENSION: &str = "month";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthArchive {
    pub year: String,
    pub month: String,
    pub count: u64,
    pub member_ids: Vec<EntityId>,
}

impl MonthArchive {
    /// `None` when the value does not split into a year and a month.
    pub fn from_summary(summary: DimensionSummary) -> Option<Self> {
        let (year, month) = split_month_value(&summary.value)?;
        Some(Self {
            year: year.to_string(),
            month: month.to_string(),
            count: summary.count,
            member_ids: summary.member_ids,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearArchive {
    pub year: String,
    pub count: u64,
    pub months: Vec<MonthArchive>,
}

pub fn split_month_value(value: &str) -> Option<(&str, &str)> {
    let (year, month) = value.split_once('-')?;
    if year.is_empty() || month.is_empty() {
        return None;
    }
    Some((year, month))
}

pub fn month_value(year: &str, month: &str) -> String {
    format!("{year}-{month}")
}

/// Groups months under their year, years descending. Months keep their
/// relative input order.
pub fn group_by_year(months: Vec<MonthArchive>) -> Vec<YearArchive> {
    let mut years: BTreeMap<String, YearArchive> = BTreeMap::new();
    for month in months {
        let entry = years.entry(month.year.clone()).or_insert_with(|| YearArchive {
            year: month.year.clone(),
            count: 0,
            months: Vec::new(),
        });
        entry.count += month.count;
        entry.months.push(month);
    }
    years.into_values().rev().collect()
}
