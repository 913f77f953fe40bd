//! Bounded window of per-frame input sets, confirmed or predicted, plus
//! the per-frame lifecycle event queues.

use std::collections::{BTreeMap, HashMap};

use crate::input::lifecycle::{InputPayload, LifecycleEvent};
use crate::peer::{PeerInterner, PeerKey};
use crate::types::{Frame, InputSeq};

/// One stored input for one peer at one frame. A confirmed record is
/// authoritative; a predicted record is a placeholder that may be
/// overwritten when the real input arrives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputRecord {
    pub seq: InputSeq,
    pub payload: InputPayload,
    pub confirmed: bool,
}

/// The input set for a single frame: at most one record per peer.
#[derive(Clone, Debug, Default)]
pub struct FrameInputs {
    records: HashMap<PeerKey, InputRecord>,
}

impl FrameInputs {
    pub fn get(&self, peer: PeerKey) -> Option<&InputRecord> {
        self.records.get(&peer)
    }

    pub fn insert(&mut self, peer: PeerKey, record: InputRecord) {
        self.records.insert(peer, record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Peers present in this set, ascending by canonical id. Iteration
    /// over a frame set is always done in this order.
    pub fn peers_sorted(&self, interner: &PeerInterner) -> Vec<PeerKey> {
        let mut peers: Vec<PeerKey> = self.records.keys().copied().collect();
        interner.sort(&mut peers);
        peers
    }
}

/// A lifecycle event queued at a frame, with a flag recording whether it
/// has fired on the current timeline. Rollback clears the flag before
/// resimulation so each event fires exactly once per effective timeline.
#[derive(Clone, Debug)]
pub struct LifecycleEntry {
    pub event: LifecycleEvent,
    pub fired: bool,
}

/// Frame-indexed input storage with a retention window.
pub struct InputHistory {
    frames: BTreeMap<Frame, FrameInputs>,
    lifecycle: BTreeMap<Frame, Vec<LifecycleEntry>>,
}

impl InputHistory {
    pub fn new() -> Self {
        Self {
            frames: BTreeMap::new(),
            lifecycle: BTreeMap::new(),
        }
    }

    /// Stores a record, overwriting any existing entry for the peer.
    pub fn set(&mut self, frame: Frame, peer: PeerKey, record: InputRecord) {
        self.frames.entry(frame).or_default().insert(peer, record);
    }

    pub fn get(&self, frame: Frame, peer: PeerKey) -> Option<&InputRecord> {
        self.frames.get(&frame).and_then(|set| set.get(peer))
    }

    pub fn frame_set(&self, frame: Frame) -> Option<&FrameInputs> {
        self.frames.get(&frame)
    }

    /// Distinct peers with a confirmed record anywhere in the retained
    /// window, ascending by canonical id.
    pub fn active_peers(&self, interner: &PeerInterner) -> Vec<PeerKey> {
        let mut peers: Vec<PeerKey> = Vec::new();
        for set in self.frames.values() {
            for (peer, record) in set.records.iter() {
                if record.confirmed && !peers.contains(peer) {
                    peers.push(*peer);
                }
            }
        }
        interner.sort(&mut peers);
        peers
    }

    /// The most recent confirmed game input for `peer` at or before
    /// `frame`. This is the "repeat last" prediction source.
    pub fn last_confirmed_game(&self, peer: PeerKey, frame: Frame) -> Option<&[u8]> {
        for (_, set) in self.frames.range(..=frame).rev() {
            if let Some(record) = set.get(peer) {
                if record.confirmed {
                    if let Some(data) = record.payload.as_game() {
                        return Some(data);
                    }
                }
            }
        }
        None
    }

    /// Queues a lifecycle event at `frame`, keeping the queue ordered by
    /// producer sequence. Redelivered events (same peer + seq + kind)
    /// are dropped.
    pub fn queue_lifecycle(&mut self, frame: Frame, event: LifecycleEvent, fired: bool) {
        let queue = self.lifecycle.entry(frame).or_default();
        if queue.iter().any(|e| e.event == event) {
            return;
        }
        let at = queue
            .iter()
            .position(|e| e.event.seq > event.seq)
            .unwrap_or(queue.len());
        queue.insert(at, LifecycleEntry { event, fired });
    }

    /// Lifecycle events queued at `frame`, ordered by producer sequence.
    pub fn lifecycle_events(&self, frame: Frame) -> &[LifecycleEntry] {
        self.lifecycle.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn lifecycle_events_mut(&mut self, frame: Frame) -> Option<&mut Vec<LifecycleEntry>> {
        self.lifecycle.get_mut(&frame)
    }

    /// Whether any lifecycle event is queued in `[from, to]`.
    pub fn has_lifecycle_in_range(&self, from: Frame, to: Frame) -> bool {
        self.lifecycle.range(from..=to).any(|(_, q)| !q.is_empty())
    }

    /// Drops all storage for frames strictly before `frame`.
    pub fn evict_before(&mut self, frame: Frame) {
        self.frames = self.frames.split_off(&frame);
        self.lifecycle = self.lifecycle.split_off(&frame);
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.lifecycle.clear();
    }
}
