//! Data access over the registered data shards
//!
//! - Broadcast writes and scatter-gather reads ([`ShardedDataOps`])
//! - Monotonic counters ([`SequenceGenerator`])

pub mod ops;
pub mod sequence;

pub use ops::{
    broadcast_insert, broadcast_insert_many, increment_by_key, read_all_deduped, read_any,
    read_one, write_one, BroadcastOutcome, ShardedDataOps,
};
pub use sequence::{next_on, next_skipping_on, SequenceGenerator, MAX_SKIP_ATTEMPTS, SEQUENCES};
