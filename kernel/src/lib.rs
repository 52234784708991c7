// Tidelog Kernel
//
// Transaction-log table engine: reconstructs table snapshots from an
// append-only log in object storage, serves time travel, and commits new
// versions under optimistic concurrency.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod invariants;
pub mod log;
pub mod replay;
pub mod runtime;
pub mod state;
pub mod table;
pub mod transaction;
pub mod vacuum;

pub use config::{EngineConfig, StorageOptions, TableOptions, VacuumOptions};
pub use error::{DeltaError, DeltaResult, ErrorCode};
pub use log::{TableVersion, Version};
pub use state::Snapshot;
pub use table::history::HistoryEntry;
pub use table::merge::MergeMetrics;
pub use table::partitions::{PartitionFilter, PartitionValue};
pub use table::restore::RestoreMetrics;
pub use table::DeltaTable;
pub use vacuum::VacuumMetrics;
