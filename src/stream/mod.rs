// ============================================================================
// Stream Adapter
// ============================================================================
//
// Change-stream records (`INSERT` / `MODIFY` / `REMOVE`, each carrying the
// entity image before and/or after the write) become lifecycle events for
// the aggregation engine. Delivery is at-least-once; the adapter never
// retries on its own, it reports which events the caller should resubmit.
//
// ============================================================================

use crate::aggregation::{AggregationEngine, EventOutcome};
use crate::core::{ArchiveError, Dimensions, EntityId, LifecycleEvent, Result};
use log::warn;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamEventName {
    Insert,
    Modify,
    Remove,
}

/// Entity image as seen by the change stream. Only the fields the archive
/// needs are read; everything else in the image is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityImage {
    pub id: EntityId,
    #[serde(default)]
    pub aggregates: Option<Dimensions>,
}

/// One change-stream record with plain JSON images.
///
/// Images are expected already unmarshalled. Typed attribute-value payloads
/// (`{"S": "..."}`, `{"M": {...}}`) must be flattened by the caller before
/// they reach [`StreamBatch::from_json`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    #[serde(rename = "eventName")]
    pub event_name: StreamEventName,
    #[serde(rename = "NewImage", default)]
    pub new_image: Option<EntityImage>,
    #[serde(rename = "OldImage", default)]
    pub old_image: Option<EntityImage>,
}

impl StreamRecord {
    /// Inserts read the new image and removes the old one. Modifies and
    /// images without aggregates produce no event.
    pub fn into_event(self) -> Option<LifecycleEvent> {
        let (image, inserted) = match self.event_name {
            StreamEventName::Insert => (self.new_image?, true),
            StreamEventName::Remove => (self.old_image?, false),
            StreamEventName::Modify => return None,
        };
        let dimensions = image.aggregates?;

        Some(if inserted {
            LifecycleEvent::inserted(image.id, dimensions)
        } else {
            LifecycleEvent::removed(image.id, dimensions)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamBatch {
    #[serde(rename = "Records")]
    pub records: Vec<StreamRecord>,
}

impl StreamBatch {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| ArchiveError::Serialization(format!("invalid stream batch: {}", e)))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub received: usize,
    pub skipped: usize,
    pub events: Vec<LifecycleEvent>,
    pub outcomes: Vec<EventOutcome>,
}

impl BatchReport {
    pub fn applied(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.applied()
    }

    /// Whole events to resubmit: any event with a transient dimension failure.
    pub fn retry_events(&self) -> Vec<LifecycleEvent> {
        self.events
            .iter()
            .zip(&self.outcomes)
            .filter(|(_, outcome)| outcome.needs_retry())
            .map(|(event, _)| event.clone())
            .collect()
    }

    pub fn summary(&self) -> String {
        format!("Successfully processed {} records.", self.received)
    }
}

pub struct StreamAdapter<'a> {
    engine: &'a AggregationEngine,
}

impl<'a> StreamAdapter<'a> {
    pub fn new(engine: &'a AggregationEngine) -> Self {
        Self { engine }
    }

    pub async fn process(&self, batch: StreamBatch) -> BatchReport {
        let received = batch.records.len();
        let events: Vec<LifecycleEvent> = batch
            .records
            .into_iter()
            .filter_map(StreamRecord::into_event)
            .collect();
        let skipped = received - events.len();

        let outcomes = self.engine.apply_batch(&events).await;
        for outcome in outcomes.iter().filter(|o| !o.is_success()) {
            warn!(
                "Event for entity '{}' left {} dimension(s) unmerged (retryable: {})",
                outcome.entity_id,
                outcome.failures.len(),
                outcome.needs_retry()
            );
        }

        BatchReport {
            received,
            skipped,
            events,
            outcomes,
        }
    }
}
