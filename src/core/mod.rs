pub mod error;
pub mod types;

pub use error::{ArchiveError, Result};
pub use types::{AggregateRecord, Dimensions, EntityId, LifecycleEvent, MemberDelta, MemberOp};
