// ============================================================================
// Aggregate Key Codec
// ============================================================================
//
// Keys are `{dimension_type}{SEPARATOR}{dimension_value}`. The type component
// may never contain the separator, so the first separator in a key always
// marks the boundary and values such as `2020-05` survive a round trip.
//
// ============================================================================

use crate::core::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const KEY_SEPARATOR: char = '-';

/// Primary identity of an aggregate record. Ordered lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateKey(String);

impl AggregateKey {
    /// Wraps a key string without validation, e.g. one read back from storage.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn decode(&self) -> Result<(String, String)> {
        decode(self)
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AggregateKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn validate_dimension_type(dimension_type: &str) -> Result<()> {
    if dimension_type.is_empty() {
        return Err(ArchiveError::InvalidDimension(
            "dimension type cannot be empty".to_string(),
        ));
    }
    if dimension_type.contains(KEY_SEPARATOR) {
        return Err(ArchiveError::InvalidDimension(format!(
            "dimension type '{}' contains reserved separator '{}'",
            dimension_type, KEY_SEPARATOR
        )));
    }
    Ok(())
}

pub fn encode(dimension_type: &str, dimension_value: &str) -> Result<AggregateKey> {
    validate_dimension_type(dimension_type)?;
    if dimension_value.is_empty() {
        return Err(ArchiveError::InvalidDimension(format!(
            "dimension '{}' has an empty value",
            dimension_type
        )));
    }
    Ok(AggregateKey(format!(
        "{dimension_type}{KEY_SEPARATOR}{dimension_value}"
    )))
}

pub fn decode(key: &AggregateKey) -> Result<(String, String)> {
    let (dimension_type, dimension_value) = key
        .0
        .split_once(KEY_SEPARATOR)
        .ok_or_else(|| ArchiveError::MalformedKey(format!("'{}' has no separator", key.0)))?;

    if dimension_type.is_empty() || dimension_value.is_empty() {
        return Err(ArchiveError::MalformedKey(format!(
            "'{}' has an empty component",
            key.0
        )));
    }

    Ok((dimension_type.to_string(), dimension_value.to_string()))
}
