//! WAL archive model and retention.

pub mod coverage;
pub mod lsn;
pub mod pruner;
pub mod segment;
pub mod timeline;

pub use lsn::Lsn;
pub use pruner::{prune, PruneOptions, PruneReport};
pub use segment::{SegmentNo, WalArchive, WalFile, WalFileKind, WalSegmentId};
pub use timeline::{TimelineId, TimelineInconsistency, TimelineMap};
