//! Fixed-capacity ring of world snapshots keyed by frame.

use thiserror::Error;

use crate::types::Frame;

/// Errors that can occur during snapshot ring operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// The ring was constructed with zero capacity
    #[error("SnapshotRing capacity must be at least 1")]
    ZeroCapacity,
}

/// An opaque world snapshot, stamped with the frame whose end-of-tick
/// state it captures and that state's 32-bit fingerprint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub frame: Frame,
    pub hash: u32,
    pub bytes: Vec<u8>,
}

/// Frame-keyed ring buffer. A slot is addressed `frame % capacity`, so a
/// save at frame f evicts the snapshot from frame f - capacity. Capacity
/// must cover the full rollback budget plus the frame being written.
pub struct SnapshotRing {
    slots: Vec<Option<Snapshot>>,
}

impl SnapshotRing {
    /// Attempts to create a ring with the given capacity.
    pub fn try_new(capacity: usize) -> Result<Self, SnapshotError> {
        if capacity == 0 {
            return Err(SnapshotError::ZeroCapacity);
        }
        Ok(Self {
            slots: (0..capacity).map(|_| None).collect(),
        })
    }

    /// Creates a ring with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self::try_new(capacity).expect("SnapshotRing capacity must be at least 1")
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, frame: Frame) -> usize {
        frame as usize % self.slots.len()
    }

    /// Stores a snapshot, overwriting whatever occupied its slot.
    pub fn save(&mut self, snapshot: Snapshot) {
        let slot = self.slot(snapshot.frame);
        self.slots[slot] = Some(snapshot);
    }

    /// The snapshot for exactly `frame`, if still retained.
    pub fn load(&self, frame: Frame) -> Option<&Snapshot> {
        match &self.slots[self.slot(frame)] {
            Some(snapshot) if snapshot.frame == frame => Some(snapshot),
            _ => None,
        }
    }

    /// The newest retained snapshot at or before `frame`. Used when the
    /// exact rollback target is absent (sparse snapshot intervals).
    pub fn load_at_or_before(&self, frame: Frame) -> Option<&Snapshot> {
        let floor = (frame as usize).saturating_sub(self.slots.len() - 1) as Frame;
        let mut candidate = frame;
        loop {
            if let Some(snapshot) = self.load(candidate) {
                return Some(snapshot);
            }
            if candidate == floor {
                return None;
            }
            candidate -= 1;
        }
    }

    /// Clears all slots holding frames strictly before `frame`.
    pub fn evict_before(&mut self, frame: Frame) {
        for slot in self.slots.iter_mut() {
            if let Some(snapshot) = slot {
                if snapshot.frame < frame {
                    *slot = None;
                }
            }
        }
    }

    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }
}
