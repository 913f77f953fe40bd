//! Typed messages exchanged with the transport collaborator.
//!
//! Wire encoding is the transport's concern; the core only requires
//! that `frame: u32`, `hash: u32` and `partition: u16` are transmitted
//! exactly. Timestamps are monotonic milliseconds as supplied by the
//! caller of the engine.

use crate::input::InputPayload;
use crate::types::{Frame, InputSeq, PartitionId};

/// One confirmed input as carried by a `Tick` message. `client` is the
/// producer's canonical string id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TickInput {
    pub seq: InputSeq,
    pub client: String,
    pub payload: InputPayload,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncMessage {
    /// Authoritative inputs for a frame, optionally carrying the
    /// majority hash the input-ordering relay observed for it.
    Tick {
        frame: Frame,
        inputs: Vec<TickInput>,
        majority_hash: Option<u32>,
    },
    /// A peer's state fingerprint for a frame.
    Hash { frame: Frame, hash: u32 },
    /// One partition's entity payload for a frame.
    Delta {
        frame: Frame,
        partition: PartitionId,
        entities: Vec<u8>,
    },
    /// An authoritative snapshot, sent to a resync requester.
    Snapshot {
        frame: Frame,
        hash: u32,
        bytes: Vec<u8>,
    },
    Ping { t_send: u64 },
    Pong { t_send: u64, t_server: u64 },
    Join { peer: String },
    Leave { peer: String },
    /// Ask the authority peer for a fresh snapshot.
    RequestResync { peer: String },
}

impl SyncMessage {
    /// Short kind name, used for counters and logs.
    pub fn kind(&self) -> MessageKind {
        match self {
            SyncMessage::Tick { .. } => MessageKind::Tick,
            SyncMessage::Hash { .. } => MessageKind::Hash,
            SyncMessage::Delta { .. } => MessageKind::Delta,
            SyncMessage::Snapshot { .. } => MessageKind::Snapshot,
            SyncMessage::Ping { .. } => MessageKind::Ping,
            SyncMessage::Pong { .. } => MessageKind::Pong,
            SyncMessage::Join { .. } => MessageKind::Join,
            SyncMessage::Leave { .. } => MessageKind::Leave,
            SyncMessage::RequestResync { .. } => MessageKind::RequestResync,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Tick,
    Hash,
    Delta,
    Snapshot,
    Ping,
    Pong,
    Join,
    Leave,
    RequestResync,
}

impl MessageKind {
    pub const ALL: [MessageKind; 9] = [
        MessageKind::Tick,
        MessageKind::Hash,
        MessageKind::Delta,
        MessageKind::Snapshot,
        MessageKind::Ping,
        MessageKind::Pong,
        MessageKind::Join,
        MessageKind::Leave,
        MessageKind::RequestResync,
    ];
}

/// Delivery target for an outbound message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Recipient {
    /// All connected peers.
    Broadcast,
    /// A single peer, by canonical string id.
    To(String),
}

/// A message the engine wants the transport to deliver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outbound {
    pub recipient: Recipient,
    pub message: SyncMessage,
}
