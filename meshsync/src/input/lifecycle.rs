//! Input payload and lifecycle event types.
//!
//! A lifecycle event is a non-game input (`join`, `leave`,
//! `resync_request`) that still influences world state: it must be
//! replayed during resimulation and undone during rollback exactly like
//! a game input, because entity creation/destruction hangs off it.

use crate::types::InputSeq;

/// The data carried by one input record: either an opaque game input or
/// a lifecycle event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InputPayload {
    Game(Vec<u8>),
    Lifecycle(LifecycleEvent),
}

impl InputPayload {
    /// The empty game payload, used as the prediction of last resort for
    /// a peer with no confirmed input history.
    pub fn empty() -> Self {
        InputPayload::Game(Vec::new())
    }

    pub fn as_game(&self) -> Option<&[u8]> {
        match self {
            InputPayload::Game(data) => Some(data),
            InputPayload::Lifecycle(_) => None,
        }
    }

    pub fn as_lifecycle(&self) -> Option<&LifecycleEvent> {
        match self {
            InputPayload::Game(_) => None,
            InputPayload::Lifecycle(event) => Some(event),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
    Join,
    Leave,
    ResyncRequest,
}

/// A lifecycle event as carried through the input channel. `peer` is the
/// canonical string id of the subject peer; `seq` orders events that
/// land on the same frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub peer: String,
    pub seq: InputSeq,
}
