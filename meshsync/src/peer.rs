//! Peer identity interning and the registry of known peers.
//!
//! Transport-supplied peer ids are opaque strings (e.g. UUIDs). They are
//! interned once into dense `PeerKey` integers; all hot-path bookkeeping
//! uses the key, and the string form is the canonical sort order.

use std::collections::HashMap;

use thiserror::Error;

use crate::input::{LifecycleEvent, LifecycleKind};
use crate::types::Frame;

/// Reliability score assigned to a peer on first sight.
pub const INITIAL_RELIABILITY: u8 = 50;
/// Reward applied to a sender's reliability on timely delta delivery.
pub const RELIABILITY_REWARD: u8 = 1;
/// Penalty applied to a sender's reliability on a missed delta deadline.
pub const RELIABILITY_PENALTY: u8 = 5;

/// Errors that can occur during peer registry operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerError {
    /// A key was presented that this interner never produced
    #[error("PeerKey {key} was not minted by this interner")]
    UnknownKey { key: u32 },
}

/// Dense, stable handle for an interned peer id. Deliberately does not
/// implement `Ord`: the canonical ordering is by the interned string and
/// must go through [`PeerInterner::sort`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerKey(u32);

impl PeerKey {
    pub fn to_u32(self) -> u32 {
        self.0
    }
}

/// String peer id <-> `PeerKey` map. Keys are stable for the lifetime of
/// the interner and are never recycled.
pub struct PeerInterner {
    ids: Vec<String>,
    keys: HashMap<String, PeerKey>,
}

impl PeerInterner {
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            keys: HashMap::new(),
        }
    }

    /// Returns the key for `id`, minting a new one on first sight.
    pub fn intern(&mut self, id: &str) -> PeerKey {
        if let Some(key) = self.keys.get(id) {
            return *key;
        }
        let key = PeerKey(self.ids.len() as u32);
        self.ids.push(id.to_string());
        self.keys.insert(id.to_string(), key);
        key
    }

    pub fn get(&self, id: &str) -> Option<PeerKey> {
        self.keys.get(id).copied()
    }

    /// Attempts to resolve a key back to its canonical string id.
    pub fn try_resolve(&self, key: PeerKey) -> Result<&str, PeerError> {
        self.ids
            .get(key.0 as usize)
            .map(String::as_str)
            .ok_or(PeerError::UnknownKey { key: key.0 })
    }

    /// Resolves a key back to its canonical string id.
    ///
    /// # Panics
    ///
    /// Panics if the key was not minted by this interner.
    pub fn resolve(&self, key: PeerKey) -> &str {
        self.try_resolve(key)
            .expect("PeerKey was not minted by this interner")
    }

    /// Sorts keys ascending by canonical string id.
    pub fn sort(&self, keys: &mut [PeerKey]) {
        keys.sort_by(|a, b| self.resolve(*a).cmp(self.resolve(*b)));
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Bookkeeping for one known peer.
#[derive(Clone, Debug)]
pub struct PeerRecord {
    pub key: PeerKey,
    pub reliability: u8,
    pub last_seen_frame: Frame,
    pub is_active: bool,
}

/// Owns the interner, the per-peer records, and the sorted active set.
///
/// The active set changes only through lifecycle events so that every
/// honest peer holds an identical set at a given frame; that identity is
/// what makes partition assignment deterministic.
pub struct PeerRegistry {
    interner: PeerInterner,
    records: Vec<PeerRecord>,
    active: Vec<PeerKey>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            interner: PeerInterner::new(),
            records: Vec::new(),
            active: Vec::new(),
        }
    }

    pub fn interner(&self) -> &PeerInterner {
        &self.interner
    }

    /// Interns `id` without activating it, creating the record on first
    /// sight. Used when a peer is referenced before its join fires.
    pub fn intern(&mut self, id: &str) -> PeerKey {
        let key = self.interner.intern(id);
        if key.0 as usize == self.records.len() {
            self.records.push(PeerRecord {
                key,
                reliability: INITIAL_RELIABILITY,
                last_seen_frame: 0,
                is_active: false,
            });
        }
        key
    }

    /// Activates a peer (observed `join`). Idempotent; a rejoining peer
    /// keeps its existing record since keys are never recycled.
    pub fn activate(&mut self, id: &str, frame: Frame) -> PeerKey {
        let key = self.intern(id);
        let record = &mut self.records[key.0 as usize];
        record.last_seen_frame = record.last_seen_frame.max(frame);
        if !record.is_active {
            record.is_active = true;
            self.active.push(key);
            let interner = &self.interner;
            self.active
                .sort_by(|a, b| interner.resolve(*a).cmp(interner.resolve(*b)));
        }
        key
    }

    /// Deactivates a peer (observed `leave`). Idempotent.
    pub fn deactivate(&mut self, key: PeerKey) {
        if let Some(record) = self.records.get_mut(key.0 as usize) {
            record.is_active = false;
        }
        self.active.retain(|k| *k != key);
    }

    /// Applies a lifecycle event's membership effect at `frame`.
    pub fn apply_lifecycle(&mut self, event: &LifecycleEvent, frame: Frame) -> PeerKey {
        match event.kind {
            LifecycleKind::Join => self.activate(&event.peer, frame),
            LifecycleKind::Leave => {
                let key = self.intern(&event.peer);
                self.deactivate(key);
                key
            }
            // Membership-neutral; the resync coordinator reacts to it.
            LifecycleKind::ResyncRequest => self.intern(&event.peer),
        }
    }

    /// Reverts a lifecycle event's membership effect. Records persist, so
    /// undoing a leave restores the same record.
    pub fn revert_lifecycle(&mut self, event: &LifecycleEvent) {
        match event.kind {
            LifecycleKind::Join => {
                if let Some(key) = self.interner.get(&event.peer) {
                    self.deactivate(key);
                }
            }
            LifecycleKind::Leave => {
                self.activate(&event.peer, 0);
            }
            LifecycleKind::ResyncRequest => {}
        }
    }

    /// Active peers, sorted ascending by canonical string id.
    pub fn active_peers(&self) -> &[PeerKey] {
        &self.active
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_active(&self, key: PeerKey) -> bool {
        self.records
            .get(key.0 as usize)
            .map(|r| r.is_active)
            .unwrap_or(false)
    }

    pub fn record(&self, key: PeerKey) -> Option<&PeerRecord> {
        self.records.get(key.0 as usize)
    }

    pub fn mark_seen(&mut self, key: PeerKey, frame: Frame) {
        if let Some(record) = self.records.get_mut(key.0 as usize) {
            record.last_seen_frame = record.last_seen_frame.max(frame);
        }
    }

    pub fn reliability(&self, key: PeerKey) -> u8 {
        self.records
            .get(key.0 as usize)
            .map(|r| r.reliability)
            .unwrap_or(INITIAL_RELIABILITY)
    }

    pub fn reward_delivery(&mut self, key: PeerKey) {
        if let Some(record) = self.records.get_mut(key.0 as usize) {
            record.reliability = record.reliability.saturating_add(RELIABILITY_REWARD).min(100);
        }
    }

    pub fn penalize_delivery(&mut self, key: PeerKey) {
        if let Some(record) = self.records.get_mut(key.0 as usize) {
            record.reliability = record.reliability.saturating_sub(RELIABILITY_PENALTY);
        }
    }

    /// Active peers, paired with their reliability, in canonical order.
    /// This is the exact input shape partition assignment expects.
    pub fn weighted_active_peers(&self) -> Vec<(PeerKey, u8)> {
        self.active
            .iter()
            .map(|k| (*k, self.reliability(*k)))
            .collect()
    }

    /// The peer designated to serve resync snapshots: smallest canonical
    /// id among active peers. Identical on every honest peer.
    pub fn authority(&self) -> Option<PeerKey> {
        self.active.first().copied()
    }

    /// Active peers not heard from within `window` frames of `frame`.
    pub fn stale_peers(&self, frame: Frame, window: Frame) -> Vec<PeerKey> {
        self.active
            .iter()
            .filter(|k| {
                self.record(**k)
                    .map(|r| frame.saturating_sub(r.last_seen_frame) > window)
                    .unwrap_or(false)
            })
            .copied()
            .collect()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.active.clear();
        self.interner = PeerInterner::new();
    }
}
