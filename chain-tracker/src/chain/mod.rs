//! Chain management: cumulative work, the in-memory chain state and the
//! channels it publishes on.

pub mod chain_work;
pub mod events;
pub mod state;

pub use chain_work::{ChainWork, accumulate_work, compact_to_target, target_to_work, work_from_bits};
pub use events::{LatestReceiver, LatestSlot};
pub use state::{ChainStateStore, DEFAULT_RETENTION_DEPTH, PruneMode};
