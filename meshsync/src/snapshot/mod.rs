pub mod ring;

pub use ring::{Snapshot, SnapshotError, SnapshotRing};
