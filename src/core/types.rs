use crate::codec::AggregateKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub type EntityId = String;

/// Dimension type (`"month"`) to dimension value (`"2020-05"`).
pub type Dimensions = BTreeMap<String, String>;

/// A create or delete notification for one entity, carrying its dimension tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Inserted {
        entity_id: EntityId,
        dimensions: Dimensions,
    },
    Removed {
        entity_id: EntityId,
        dimensions: Dimensions,
    },
}

impl LifecycleEvent {
    pub fn inserted(entity_id: impl Into<EntityId>, dimensions: Dimensions) -> Self {
        Self::Inserted {
            entity_id: entity_id.into(),
            dimensions,
        }
    }

    pub fn removed(entity_id: impl Into<EntityId>, dimensions: Dimensions) -> Self {
        Self::Removed {
            entity_id: entity_id.into(),
            dimensions,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            Self::Inserted { entity_id, .. } | Self::Removed { entity_id, .. } => entity_id,
        }
    }

    pub fn dimensions(&self) -> &Dimensions {
        match self {
            Self::Inserted { dimensions, .. } | Self::Removed { dimensions, .. } => dimensions,
        }
    }

    /// The membership operation every dimension of this event maps to.
    pub fn member_op(&self) -> MemberOp {
        match self {
            Self::Inserted { .. } => MemberOp::Add,
            Self::Removed { .. } => MemberOp::Remove,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberOp {
    Add,
    Remove,
}

/// One set mutation applied by a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDelta {
    pub entity_id: EntityId,
    pub op: MemberOp,
}

impl MemberDelta {
    pub fn add(entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_id: entity_id.into(),
            op: MemberOp::Add,
        }
    }

    pub fn remove(entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_id: entity_id.into(),
            op: MemberOp::Remove,
        }
    }
}

/// Denormalized membership set for one dimension value.
///
/// `count` always equals `members.len()`; it is recomputed by [`AggregateRecord::apply`]
/// and never adjusted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub key: AggregateKey,
    pub dimension_type: String,
    pub count: u64,
    pub members: BTreeSet<EntityId>,
}

impl AggregateRecord {
    pub fn new(key: AggregateKey, dimension_type: impl Into<String>) -> Self {
        Self {
            key,
            dimension_type: dimension_type.into(),
            count: 0,
            members: BTreeSet::new(),
        }
    }

    /// Applies one delta. Adding a present id or removing an absent id leaves
    /// the set unchanged. Returns whether membership changed.
    pub fn apply(&mut self, delta: &MemberDelta) -> bool {
        let changed = match delta.op {
            MemberOp::Add => self.members.insert(delta.entity_id.clone()),
            MemberOp::Remove => self.members.remove(&delta.entity_id),
        };
        self.count = self.members.len() as u64;
        changed
    }

    pub fn is_consistent(&self) -> bool {
        self.count == self.members.len() as u64
    }

    pub fn member_ids(&self) -> Vec<EntityId> {
        self.members.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> AggregateRecord {
        AggregateRecord::new(AggregateKey::from_raw("month-2020-05"), "month")
    }

    #[test]
    fn test_duplicate_add_does_not_inflate_count() {
        let mut rec = record();
        assert!(rec.apply(&MemberDelta::add("a1")));
        assert!(!rec.apply(&MemberDelta::add("a1")));
        assert_eq!(rec.count, 1);
        assert!(rec.is_consistent());
    }

    #[test]
    fn test_remove_absent_member_is_noop() {
        let mut rec = record();
        assert!(!rec.apply(&MemberDelta::remove("ghost")));
        assert_eq!(rec.count, 0);
        assert!(rec.members.is_empty());
    }

    #[test]
    fn test_event_accessors() {
        let mut dims = Dimensions::new();
        dims.insert("year".into(), "2020".into());
        let event = LifecycleEvent::removed("a1", dims.clone());
        assert_eq!(event.entity_id(), "a1");
        assert_eq!(event.dimensions(), &dims);
        assert_eq!(event.member_op(), MemberOp::Remove);
    }

    #[test]
    fn test_event_json_shape() {
        let json = r#"{"kind":"inserted","entity_id":"a1","dimensions":{"month":"2020-05"}}"#;
        let event: LifecycleEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.member_op(), MemberOp::Add);
        assert_eq!(event.dimensions().get("month").map(String::as_str), Some("2020-05"));
    }
}
