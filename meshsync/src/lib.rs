//! # Meshsync
//! Deterministic, peer-assisted networked simulation runtime. Given
//! identical inputs in identical order, every participating peer
//! computes bit-exact identical world state at every tick; when a peer
//! diverges, hash consensus flags it and an authoritative snapshot
//! brings it back.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod config;
mod consensus;
mod delta;
mod engine;
mod hash;
mod input;
mod messages;
mod observer;
mod partition;
mod peer;
mod prediction;
mod resync;
mod snapshot;
mod time;
mod transport;
mod types;
mod world;

pub use config::SyncConfig;
pub use consensus::{DesyncInfo, HashArbiter, HashVerdict};
pub use delta::{DeltaDistributor, DeltaReport};
pub use engine::{EngineError, SyncEngine, SyncStats, TickReport};
pub use hash::{hash_u32, xxhash32, Xorshift32};
pub use input::{
    FrameInputs, InputHistory, InputPayload, InputRecord, LifecycleEntry, LifecycleEvent,
    LifecycleKind,
};
pub use messages::{MessageKind, Outbound, Recipient, SyncMessage, TickInput};
pub use observer::{NullObserver, SyncEvent, SyncObserver};
pub use partition::{
    assign, entity_partition, num_partitions, Assignment, DegradationTier, ENTITIES_PER_PARTITION,
};
pub use peer::{PeerError, PeerInterner, PeerKey, PeerRecord, PeerRegistry};
pub use prediction::{
    AdvanceOutcome, ConfirmedInput, PredictionError, PredictionManager, PredictionStats,
    TickReceipt,
};
pub use resync::{ResyncCoordinator, ResyncPoll};
pub use snapshot::{Snapshot, SnapshotError, SnapshotRing};
pub use time::TimeSyncManager;
pub use transport::{channel, InboundMessage, InboundReceiver, InboundSender, SendError};
pub use types::{Frame, InputSeq, PartitionId};
pub use world::{AppliedInput, World, WorldError};
