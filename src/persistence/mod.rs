//! Persistence primitives shared by the Queue, Stream, and PubSub engines:
//! the append-only segment log and its three durability modes (spec.md §4.7).

mod mode;
mod segment;

pub use mode::PersistenceMode;
pub use segment::SegmentLog;
