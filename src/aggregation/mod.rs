// ============================================================================
// Aggregation Engine
// ============================================================================
//
// Turns lifecycle events into per-dimension set merges. The engine holds no
// state of its own between calls: every merge goes straight to the store,
// and convergence under duplicate or reordered delivery comes from merges
// being set operations.
//
// ============================================================================

pub mod outcome;

pub use outcome::{DimensionFailure, EventOutcome};

use crate::codec;
use crate::core::{AggregateRecord, LifecycleEvent, MemberDelta, MemberOp, Result};
use crate::storage::AggregateStore;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

pub struct AggregationEngine {
    store: Arc<dyn AggregateStore>,
    max_in_flight: usize,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn AggregateStore>) -> Self {
        Self {
            store,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    /// Bound on merges (per event) and events (per batch) dispatched at once.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn AggregateStore> {
        &self.store
    }

    /// Applies one event: one independent merge per dimension tag.
    ///
    /// Never fails as a whole. A dimension that cannot be merged is recorded
    /// in [`EventOutcome::failures`] while the others still go through.
    pub async fn apply(&self, lifecycle_event: &LifecycleEvent) -> EventOutcome {
        let entity_id = lifecycle_event.entity_id();
        let op = lifecycle_event.member_op();
        let span = info_span!(
            "aggregation.apply",
            entity_id = %entity_id,
            op = ?op,
            dimensions = lifecycle_event.dimensions().len()
        );

        async move {
            let mut outcome = EventOutcome::new(entity_id, op);

            // Futures are built before the first await so no closure is held
            // across it (keeps the returned future provably `Send`).
            let merges: Vec<_> = lifecycle_event
                .dimensions()
                .iter()
                .map(|(dimension_type, dimension_value)| async move {
                    let result = self
                        .merge_dimension(entity_id, op, dimension_type, dimension_value)
                        .await;
                    (dimension_type, dimension_value, result)
                })
                .collect();
            let results: Vec<(&String, &String, Result<AggregateRecord>)> =
                stream::iter(merges)
                    .buffered(self.max_in_flight)
                    .collect()
                    .await;

            for (dimension_type, dimension_value, result) in results {
                match result {
                    Ok(record) => outcome.merged.push(record),
                    Err(err) => {
                        event!(
                            Level::ERROR,
                            error = %err,
                            dimension_type = %dimension_type,
                            dimension_value = %dimension_value,
                            "dimension merge failed"
                        );
                        outcome.failures.push(DimensionFailure {
                            dimension_type: dimension_type.clone(),
                            dimension_value: dimension_value.clone(),
                            error: err,
                        });
                    }
                }
            }

            event!(
                Level::DEBUG,
                merged = outcome.merged.len(),
                failed = outcome.failures.len(),
                "lifecycle event applied"
            );
            outcome
        }
        .instrument(span)
        .await
    }

    /// Applies every event and returns one outcome per event, in input order.
    ///
    /// Events are dispatched concurrently in waves of key-disjoint events. An
    /// event that shares a dimension with an event already in the current
    /// wave starts a new wave, so merges to one key land in input order and a
    /// create followed by a delete of the same entity always ends as "not a
    /// member".
    pub async fn apply_batch(&self, events: &[LifecycleEvent]) -> Vec<EventOutcome> {
        let mut outcomes = Vec::with_capacity(events.len());
        let mut wave: Vec<&LifecycleEvent> = Vec::new();
        let mut wave_keys: HashSet<(&str, &str)> = HashSet::new();

        for lifecycle_event in events {
            let conflicts = lifecycle_event
                .dimensions()
                .iter()
                .any(|(t, v)| wave_keys.contains(&(t.as_str(), v.as_str())));
            if conflicts {
                outcomes.extend(self.apply_wave(&wave).await);
                wave.clear();
                wave_keys.clear();
            }
            wave_keys.extend(
                lifecycle_event
                    .dimensions()
                    .iter()
                    .map(|(t, v)| (t.as_str(), v.as_str())),
            );
            wave.push(lifecycle_event);
        }
        outcomes.extend(self.apply_wave(&wave).await);
        outcomes
    }

    async fn apply_wave(&self, wave: &[&LifecycleEvent]) -> Vec<EventOutcome> {
        let applies: Vec<_> = wave
            .iter()
            .map(|lifecycle_event| self.apply(lifecycle_event))
            .collect();
        stream::iter(applies)
            .buffered(self.max_in_flight)
            .collect()
            .await
    }

    async fn merge_dimension(
        &self,
        entity_id: &str,
        op: MemberOp,
        dimension_type: &str,
        dimension_value: &str,
    ) -> Result<AggregateRecord> {
        let key = codec::encode(dimension_type, dimension_value)?;
        let delta = MemberDelta {
            entity_id: entity_id.to_string(),
            op,
        };
        self.store.upsert_merge(&key, dimension_type, delta).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArchiveError, Dimensions};
    use crate::storage::InMemoryAggregateStore;

    fn dims(pairs: &[(&str, &str)]) -> Dimensions {
        pairs
            .iter()
            .map(|(t, v)| (t.to_string(), v.to_string()))
            .collect()
    }

    fn engine() -> AggregationEngine {
        AggregationEngine::new(Arc::new(InMemoryAggregateStore::new()))
    }

    #[tokio::test]
    async fn test_apply_merges_every_dimension() {
        let engine = engine();
        let outcome = engine
            .apply(&LifecycleEvent::inserted("a1", dims(&[("month", "2020-05"), ("year", "2020")])))
            .await;

        assert!(outcome.is_success());
        let keys: Vec<_> = outcome.merged.iter().map(|r| r.key.to_string()).collect();
        assert_eq!(keys, vec!["month-2020-05", "year-2020"]);
    }

    #[tokio::test]
    async fn test_event_without_dimensions_is_noop() {
        let engine = engine();
        let outcome = engine.apply(&LifecycleEvent::inserted("a1", Dimensions::new())).await;
        assert!(outcome.is_success());
        assert!(outcome.merged.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_dimension_rejected_without_blocking_others() {
        let engine = engine();
        let outcome = engine
            .apply(&LifecycleEvent::inserted("a1", dims(&[("by-month", "2020-05"), ("year", "2020")])))
            .await;

        assert_eq!(outcome.merged.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert!(matches!(outcome.failures[0].error, ArchiveError::InvalidDimension(_)));
        assert!(!outcome.needs_retry());
    }

    #[tokio::test]
    async fn test_create_then_delete_in_one_batch() {
        let engine = engine();
        let tags = dims(&[("month", "2020-05")]);
        let outcomes = engine
            .apply_batch(&[
                LifecycleEvent::inserted("a1", tags.clone()),
                LifecycleEvent::removed("a1", tags),
            ])
            .await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].op, MemberOp::Add);
        assert_eq!(outcomes[1].op, MemberOp::Remove);

        let key = codec::encode("month", "2020-05").unwrap();
        let record = engine.store().get(&key).await.unwrap().unwrap();
        assert_eq!(record.count, 0);
        assert!(record.members.is_empty());
    }
}
