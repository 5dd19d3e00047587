use crate::core::{AggregateRecord, ArchiveError, EntityId, MemberOp};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionFailure {
    pub dimension_type: String,
    pub dimension_value: String,
    #[serde(serialize_with = "serialize_error")]
    pub error: ArchiveError,
}

fn serialize_error<S: Serializer>(error: &ArchiveError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&error.to_string())
}

/// Result of applying one lifecycle event, dimension by dimension.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventOutcome {
    pub entity_id: EntityId,
    pub op: MemberOp,
    /// Post-merge records, in dimension-type order.
    pub merged: Vec<AggregateRecord>,
    pub failures: Vec<DimensionFailure>,
}

impl EventOutcome {
    pub(crate) fn new(entity_id: impl Into<EntityId>, op: MemberOp) -> Self {
        Self {
            entity_id: entity_id.into(),
            op,
            merged: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// True when at least one dimension failed for a transient reason, so
    /// resubmitting the whole event can complete it.
    pub fn needs_retry(&self) -> bool {
        self.failures.iter().any(|f| f.error.is_retryable())
    }

    /// Dimensions rejected as caller-input defects.
    pub fn rejected(&self) -> impl Iterator<Item = &DimensionFailure> {
        self.failures.iter().filter(|f| !f.error.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(error: ArchiveError) -> DimensionFailure {
        DimensionFailure {
            dimension_type: "month".into(),
            dimension_value: "2020-05".into(),
            error,
        }
    }

    #[test]
    fn test_retry_only_for_transient_failures() {
        let mut outcome = EventOutcome::new("a1", MemberOp::Add);
        assert!(outcome.is_success());

        outcome.failures.push(failure(ArchiveError::InvalidDimension("bad".into())));
        assert!(!outcome.is_success());
        assert!(!outcome.needs_retry());
        assert_eq!(outcome.rejected().count(), 1);

        outcome.failures.push(failure(ArchiveError::StoreUnavailable("down".into())));
        assert!(outcome.needs_retry());
        assert_eq!(outcome.rejected().count(), 1);
    }

    #[test]
    fn test_failure_serializes_error_message() {
        let json = serde_json::to_value(failure(ArchiveError::StoreUnavailable("down".into()))).unwrap();
        assert_eq!(json["error"], "Store unavailable: down");
    }
}
