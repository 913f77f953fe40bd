//! Peer-sharded state-delta dissemination.
//!
//! Each frame the entity space is partitioned and every partition is
//! assigned a redundant set of senders by the deterministic assignment
//! function. The local peer serializes and broadcasts the partitions it
//! owns, buffers inbound partition payloads from peers it can verify
//! were assigned, and at the frame's delta deadline classifies how
//! complete delivery was before merging.
//!
//! Assignment is recomputed per frame with no smoothing. An entity whose
//! partition changes across a partition-count transition may be covered
//! by both the old and new senders; merges are required to be
//! idempotent world-side, so double delivery is harmless, and every
//! frame's partition space is fully covered so nothing is skipped.

use std::collections::{BTreeMap, HashSet};

use log::{debug, warn};

use crate::messages::{Outbound, Recipient, SyncMessage};
use crate::partition::{assign, Assignment, DegradationTier};
use crate::peer::{PeerKey, PeerRegistry};
use crate::types::{Frame, PartitionId};
use crate::world::World;

/// Outcome of one frame's delta collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeltaReport {
    pub frame: Frame,
    pub tier: DegradationTier,
    /// Remote partitions actually merged into the world.
    pub merged_partitions: usize,
}

/// Per-frame collection state.
struct FrameCollection {
    assignment: Assignment,
    /// First accepted payload per partition, from a verified sender.
    accepted: BTreeMap<PartitionId, (PeerKey, Vec<u8>)>,
    /// Every `(partition, assigned sender)` delivery observed,
    /// including the local peer's own emissions.
    delivered: HashSet<(PartitionId, PeerKey)>,
}

pub struct DeltaDistributor {
    local_peer: PeerKey,
    senders_per_partition: usize,
    grace_frames: Frame,
    collections: BTreeMap<Frame, FrameCollection>,
    /// Deltas that arrived before the local simulation reached their
    /// frame; replayed into the collection once it exists.
    early: BTreeMap<Frame, Vec<(PeerKey, PartitionId, Vec<u8>)>>,
}

impl DeltaDistributor {
    pub fn new(local_peer: PeerKey, senders_per_partition: usize, grace_frames: Frame) -> Self {
        Self {
            local_peer,
            senders_per_partition,
            grace_frames,
            collections: BTreeMap::new(),
            early: BTreeMap::new(),
        }
    }

    /// Computes the frame's assignment, emits the partitions the local
    /// peer owns, and opens the frame's collection.
    pub fn emit<W: World>(
        &mut self,
        world: &W,
        registry: &PeerRegistry,
        frame: Frame,
        out: &mut Vec<Outbound>,
    ) {
        let peers = registry.weighted_active_peers();
        let assignment = assign(
            world.entity_count(),
            &peers,
            frame,
            self.senders_per_partition,
            registry.interner(),
        );

        let mut collection = FrameCollection {
            assignment,
            accepted: BTreeMap::new(),
            delivered: HashSet::new(),
        };

        for partition in collection.assignment.partitions_for(self.local_peer) {
            let entities =
                world.partition_delta(partition, collection.assignment.num_partitions());
            collection.delivered.insert((partition, self.local_peer));
            out.push(Outbound {
                recipient: Recipient::Broadcast,
                message: SyncMessage::Delta {
                    frame,
                    partition,
                    entities,
                },
            });
        }

        // Replay anything that raced ahead of the local simulation.
        if let Some(buffered) = self.early.remove(&frame) {
            for (sender, partition, bytes) in buffered {
                Self::accept(&mut collection, self.local_peer, sender, partition, bytes);
            }
        }

        self.collections.insert(frame, collection);
    }

    /// Buffers an inbound delta. Only the first copy from a sender the
    /// local assignment confirms for that partition is kept.
    pub fn receive(&mut self, frame: Frame, sender: PeerKey, partition: PartitionId, bytes: Vec<u8>) {
        match self.collections.get_mut(&frame) {
            Some(collection) => {
                Self::accept(collection, self.local_peer, sender, partition, bytes);
            }
            None => {
                // Not emitted locally yet; park it until the frame opens.
                self.early
                    .entry(frame)
                    .or_default()
                    .push((sender, partition, bytes));
            }
        }
    }

    fn accept(
        collection: &mut FrameCollection,
        local_peer: PeerKey,
        sender: PeerKey,
        partition: PartitionId,
        bytes: Vec<u8>,
    ) {
        if !collection.assignment.is_assigned(sender, partition) {
            debug!("discarding delta for partition {partition} from unassigned sender");
            return;
        }
        collection.delivered.insert((partition, sender));
        if sender == local_peer {
            return;
        }
        collection.accepted.entry(partition).or_insert((sender, bytes));
    }

    /// Finalizes every frame whose delta deadline has passed: settles
    /// sender reliability, classifies the degradation tier, and merges
    /// the accepted payloads unless the tier is `Skip`.
    pub fn finalize_due<W: World>(
        &mut self,
        world: &mut W,
        registry: &mut PeerRegistry,
        current_frame: Frame,
    ) -> Vec<DeltaReport> {
        let mut reports = Vec::new();
        let due: Vec<Frame> = self
            .collections
            .keys()
            .copied()
            .filter(|f| current_frame > f.saturating_add(self.grace_frames))
            .collect();

        for frame in due {
            let collection = match self.collections.remove(&frame) {
                Some(collection) => collection,
                None => continue,
            };
            reports.push(self.finalize(world, registry, frame, collection));
        }

        // Early buffers for frames the simulation never reached (e.g.
        // skipped over by a resync) expire with the same deadline.
        let horizon = current_frame.saturating_sub(self.grace_frames);
        self.early = self.early.split_off(&horizon);

        reports
    }

    fn finalize<W: World>(
        &mut self,
        world: &mut W,
        registry: &mut PeerRegistry,
        frame: Frame,
        collection: FrameCollection,
    ) -> DeltaReport {
        let assignment = &collection.assignment;
        let total_partitions = assignment.num_partitions();

        // Settle reliability for every assigned sender slot.
        for partition in 0..total_partitions {
            for sender in assignment.senders(partition) {
                if collection.delivered.contains(&(partition, *sender)) {
                    registry.reward_delivery(*sender);
                } else {
                    registry.penalize_delivery(*sender);
                }
            }
        }

        let received = (0..total_partitions)
            .filter(|p| {
                assignment.is_assigned(self.local_peer, *p) || collection.accepted.contains_key(p)
            })
            .count() as PartitionId;
        let tier = DegradationTier::classify(
            total_partitions,
            received,
            collection.delivered.len(),
            assignment.total_sender_slots(),
        );

        let mut merged = 0;
        if tier.applies_deltas() {
            for (partition, (_, bytes)) in &collection.accepted {
                match world.apply_partition_delta(*partition, bytes) {
                    Ok(()) => merged += 1,
                    Err(error) => {
                        warn!("failed to merge partition {partition} at frame {frame}: {error}");
                    }
                }
            }
        } else {
            debug!(
                "skipping delta application at frame {frame}: {}/{} partitions",
                received, total_partitions
            );
        }

        DeltaReport {
            frame,
            tier,
            merged_partitions: merged,
        }
    }

    /// The local assignment computed for a frame, if still collecting.
    pub fn assignment(&self, frame: Frame) -> Option<&Assignment> {
        self.collections.get(&frame).map(|c| &c.assignment)
    }

    pub fn reset(&mut self) {
        self.collections.clear();
        self.early.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::INITIAL_RELIABILITY;
    use crate::world::{AppliedInput, WorldError};

    /// World with a fixed entity count and recording of merged deltas.
    struct StubWorld {
        entities: u32,
        merged: Vec<(PartitionId, Vec<u8>)>,
    }

    impl StubWorld {
        fn new(entities: u32) -> Self {
            Self {
                entities,
                merged: Vec::new(),
            }
        }
    }

    impl World for StubWorld {
        fn tick(&mut self, _frame: Frame, _inputs: &[AppliedInput]) -> Result<(), WorldError> {
            Ok(())
        }
        fn snapshot(&mut self) -> Vec<u8> {
            Vec::new()
        }
        fn load_snapshot(&mut self, _bytes: &[u8]) -> Result<(), WorldError> {
            Ok(())
        }
        fn state_hash(&self) -> u32 {
            0
        }
        fn entity_count(&self) -> u32 {
            self.entities
        }
        fn partition_delta(&self, partition: PartitionId, _n: PartitionId) -> Vec<u8> {
            vec![partition as u8]
        }
        fn apply_partition_delta(
            &mut self,
            partition: PartitionId,
            bytes: &[u8],
        ) -> Result<(), WorldError> {
            self.merged.push((partition, bytes.to_vec()));
            Ok(())
        }
    }

    fn two_peer_setup() -> (PeerRegistry, PeerKey, PeerKey) {
        let mut registry = PeerRegistry::new();
        let local = registry.activate("a-local", 0);
        let remote = registry.activate("b-remote", 0);
        (registry, local, remote)
    }

    #[test]
    fn emit_broadcasts_locally_assigned_partitions() {
        let (registry, local, _) = two_peer_setup();
        let world = StubWorld::new(100);
        let mut distributor = DeltaDistributor::new(local, 2, 1);
        let mut out = Vec::new();
        distributor.emit(&world, &registry, 5, &mut out);

        // 100 entities / 2 peers -> 4 partitions; 2 senders from 2
        // peers means the local peer sends every partition.
        assert_eq!(out.len(), 4);
        for outbound in &out {
            assert_eq!(outbound.recipient, Recipient::Broadcast);
            assert!(matches!(
                outbound.message,
                SyncMessage::Delta { frame: 5, .. }
            ));
        }
    }

    #[test]
    fn complete_delivery_is_normal_and_rewards_senders() {
        let (mut registry, local, remote) = two_peer_setup();
        let mut world = StubWorld::new(100);
        let mut distributor = DeltaDistributor::new(local, 2, 1);
        let mut out = Vec::new();
        distributor.emit(&world, &registry, 5, &mut out);

        let partitions = distributor.assignment(5).unwrap().num_partitions();
        for partition in 0..partitions {
            distributor.receive(5, remote, partition, vec![0xAB]);
        }

        let reports = distributor.finalize_due(&mut world, &mut registry, 7);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].tier, DegradationTier::Normal);
        assert_eq!(reports[0].merged_partitions, partitions as usize);
        assert_eq!(world.merged.len(), partitions as usize);
        assert_eq!(registry.reliability(remote), INITIAL_RELIABILITY + 4);
        assert_eq!(registry.reliability(local), INITIAL_RELIABILITY + 4);
    }

    #[test]
    fn missing_remote_deltas_penalize_and_degrade() {
        let (mut registry, local, remote) = two_peer_setup();
        let mut world = StubWorld::new(100);
        let mut distributor = DeltaDistributor::new(local, 2, 1);
        let mut out = Vec::new();
        distributor.emit(&world, &registry, 5, &mut out);

        // The remote never delivers anything. All partitions are still
        // locally covered, but trust is incomplete.
        let reports = distributor.finalize_due(&mut world, &mut registry, 7);
        assert_eq!(reports[0].tier, DegradationTier::Degraded);
        assert_eq!(reports[0].merged_partitions, 0);
        assert_eq!(registry.reliability(remote), INITIAL_RELIABILITY - 4 * 5);
    }

    #[test]
    fn duplicate_deltas_keep_first_accepted_copy() {
        let (mut registry, local, remote) = two_peer_setup();
        let mut world = StubWorld::new(100);
        let mut distributor = DeltaDistributor::new(local, 2, 1);
        let mut out = Vec::new();
        distributor.emit(&world, &registry, 5, &mut out);

        distributor.receive(5, remote, 0, vec![1]);
        distributor.receive(5, remote, 0, vec![2]);
        distributor.finalize_due(&mut world, &mut registry, 7);
        let first = world.merged.iter().find(|(p, _)| *p == 0).unwrap();
        assert_eq!(first.1, vec![1]);
    }

    #[test]
    fn unassigned_senders_are_discarded() {
        let mut registry = PeerRegistry::new();
        let local = registry.activate("a", 0);
        registry.activate("b", 0);
        let outsider = registry.intern("z-outsider");
        let mut world = StubWorld::new(100);
        let mut distributor = DeltaDistributor::new(local, 2, 1);
        let mut out = Vec::new();
        distributor.emit(&world, &registry, 5, &mut out);

        distributor.receive(5, outsider, 0, vec![9]);
        distributor.finalize_due(&mut world, &mut registry, 7);
        assert!(world.merged.is_empty());
    }

    #[test]
    fn early_deltas_are_parked_until_the_frame_opens() {
        let (mut registry, local, remote) = two_peer_setup();
        let mut world = StubWorld::new(100);
        let mut distributor = DeltaDistributor::new(local, 2, 1);

        distributor.receive(5, remote, 0, vec![7]);
        let mut out = Vec::new();
        distributor.emit(&world, &registry, 5, &mut out);
        distributor.finalize_due(&mut world, &mut registry, 7);
        assert!(world.merged.iter().any(|(p, b)| *p == 0 && b == &vec![7]));
    }

    #[test]
    fn finalize_waits_for_the_grace_deadline() {
        let (mut registry, local, _) = two_peer_setup();
        let mut world = StubWorld::new(100);
        let mut distributor = DeltaDistributor::new(local, 2, 1);
        let mut out = Vec::new();
        distributor.emit(&world, &registry, 5, &mut out);

        assert!(distributor
            .finalize_due(&mut world, &mut registry, 6)
            .is_empty());
        assert_eq!(distributor.finalize_due(&mut world, &mut registry, 7).len(), 1);
    }
}
