pub mod engine;
pub mod memory;
pub mod persistence;
pub mod table;

pub use engine::{AggregateStore, QueryOptions};
pub use memory::InMemoryAggregateStore;
pub use persistence::{DurabilityMode, PersistenceManager, WalEntry};
pub use table::AggregateTable;
