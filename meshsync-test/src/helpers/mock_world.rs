//! A deterministic toy world for end-to-end tests.
//!
//! Entities are `(id, x, y)` triples in a sorted map. Inputs are tiny
//! byte-encoded ops: spawn N entities, or move every entity by a
//! delta. Identical inputs in identical order always produce bit-exact
//! identical state.
//!
//! Partition deltas reconcile component state only: `apply` updates
//! entities it already knows and ignores unknown ids, because entity
//! creation and destruction ride the input channel, not the delta
//! channel. That also makes merges idempotent.

use std::collections::BTreeMap;

use meshsync::{xxhash32, AppliedInput, Frame, PartitionId, World, WorldError};

const OP_SPAWN: u8 = 1;
const OP_MOVE: u8 = 2;

/// Encodes a spawn-N-entities input payload.
pub fn spawn_input(count: u32) -> Vec<u8> {
    let mut data = vec![OP_SPAWN];
    data.extend_from_slice(&count.to_le_bytes());
    data
}

/// Encodes a move-all-entities input payload.
pub fn move_input(dx: i32, dy: i32) -> Vec<u8> {
    let mut data = vec![OP_MOVE];
    data.extend_from_slice(&dx.to_le_bytes());
    data.extend_from_slice(&dy.to_le_bytes());
    data
}

#[derive(Clone, Debug)]
pub struct MockWorld {
    next_entity_id: u32,
    entities: BTreeMap<u32, (i64, i64)>,
    /// Entities to spawn outside the input channel on the next tick.
    pending_rogue_spawn: u32,
}

impl MockWorld {
    pub fn new() -> Self {
        Self {
            next_entity_id: 1,
            entities: BTreeMap::new(),
            pending_rogue_spawn: 0,
        }
    }

    /// Arms a one-shot divergence: the next `tick` spawns `count`
    /// entities that no input ever confirmed. Because it fires inside a
    /// tick, the divergence lands in the confirmed timeline and its
    /// snapshots, so rollback resimulation carries it along instead of
    /// erasing it; only an authoritative snapshot removes it.
    pub fn inject_spawn_on_next_tick(&mut self, count: u32) {
        self.pending_rogue_spawn = count;
    }

    /// Spawns entities outside the input channel. Tests use this to
    /// inject divergence on one peer.
    pub fn spawn_direct(&mut self, count: u32) {
        for _ in 0..count {
            let id = self.next_entity_id;
            self.next_entity_id += 1;
            self.entities.insert(id, (i64::from(id) * 10, 0));
        }
    }

    pub fn entity(&self, id: u32) -> Option<(i64, i64)> {
        self.entities.get(&id).copied()
    }

    fn apply_op(&mut self, data: &[u8]) {
        match data.first() {
            Some(&OP_SPAWN) if data.len() == 5 => {
                let count = u32::from_le_bytes(data[1..5].try_into().unwrap());
                self.spawn_direct(count);
            }
            Some(&OP_MOVE) if data.len() == 9 => {
                let dx = i64::from(i32::from_le_bytes(data[1..5].try_into().unwrap()));
                let dy = i64::from(i32::from_le_bytes(data[5..9].try_into().unwrap()));
                for (_, (x, y)) in self.entities.iter_mut() {
                    *x += dx;
                    *y += dy;
                }
            }
            // Empty or unknown payloads are no-ops.
            _ => {}
        }
    }

    fn entity_bytes(entries: impl Iterator<Item = (u32, i64, i64)>) -> Vec<u8> {
        let mut bytes = Vec::new();
        for (id, x, y) in entries {
            bytes.extend_from_slice(&id.to_le_bytes());
            bytes.extend_from_slice(&x.to_le_bytes());
            bytes.extend_from_slice(&y.to_le_bytes());
        }
        bytes
    }
}

impl World for MockWorld {
    fn tick(&mut self, _frame: Frame, inputs: &[AppliedInput]) -> Result<(), WorldError> {
        for input in inputs {
            self.apply_op(&input.data);
        }
        if self.pending_rogue_spawn > 0 {
            let count = self.pending_rogue_spawn;
            self.pending_rogue_spawn = 0;
            self.spawn_direct(count);
        }
        Ok(())
    }

    fn snapshot(&mut self) -> Vec<u8> {
        let mut bytes = self.next_entity_id.to_le_bytes().to_vec();
        bytes.extend(Self::entity_bytes(
            self.entities.iter().map(|(id, (x, y))| (*id, *x, *y)),
        ));
        bytes
    }

    fn load_snapshot(&mut self, bytes: &[u8]) -> Result<(), WorldError> {
        if bytes.len() < 4 || (bytes.len() - 4) % 20 != 0 {
            return Err(WorldError::BadSnapshot {
                detail: format!("bad length {}", bytes.len()),
            });
        }
        self.next_entity_id = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        self.entities.clear();
        for chunk in bytes[4..].chunks_exact(20) {
            let id = u32::from_le_bytes(chunk[0..4].try_into().unwrap());
            let x = i64::from_le_bytes(chunk[4..12].try_into().unwrap());
            let y = i64::from_le_bytes(chunk[12..20].try_into().unwrap());
            self.entities.insert(id, (x, y));
        }
        Ok(())
    }

    fn state_hash(&self) -> u32 {
        let bytes = Self::entity_bytes(self.entities.iter().map(|(id, (x, y))| (*id, *x, *y)));
        xxhash32(&bytes, 0)
    }

    fn entity_count(&self) -> u32 {
        self.entities.len() as u32
    }

    fn partition_delta(&self, partition: PartitionId, num_partitions: PartitionId) -> Vec<u8> {
        let n = u32::from(num_partitions.max(1));
        Self::entity_bytes(
            self.entities
                .iter()
                .filter(|(id, _)| **id % n == u32::from(partition))
                .map(|(id, (x, y))| (*id, *x, *y)),
        )
    }

    fn apply_partition_delta(
        &mut self,
        _partition: PartitionId,
        bytes: &[u8],
    ) -> Result<(), WorldError> {
        if bytes.len() % 20 != 0 {
            return Err(WorldError::BadDelta {
                detail: format!("bad length {}", bytes.len()),
            });
        }
        for chunk in bytes.chunks_exact(20) {
            let id = u32::from_le_bytes(chunk[0..4].try_into().unwrap());
            let x = i64::from_le_bytes(chunk[4..12].try_into().unwrap());
            let y = i64::from_le_bytes(chunk[12..20].try_into().unwrap());
            if let Some(entry) = self.entities.get_mut(&id) {
                *entry = (x, y);
            }
        }
        Ok(())
    }
}
