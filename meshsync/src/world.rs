//! The simulation world collaborator.

use thiserror::Error;

use crate::peer::PeerKey;
use crate::types::{Frame, PartitionId};

/// Errors surfaced by a world implementation. Any error from `tick` or
/// `load_snapshot` is treated as fatal by the engine: the simulation is
/// suspended until `reset()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorldError {
    #[error("world tick failed at frame {frame}: {detail}")]
    TickFailed { frame: Frame, detail: String },
    #[error("snapshot could not be decoded: {detail}")]
    BadSnapshot { detail: String },
    #[error("partition delta could not be applied: {detail}")]
    BadDelta { detail: String },
}

/// One game input as applied to the world for a frame. Lifecycle events
/// never reach `tick`; they are delivered through the prediction
/// manager's lifecycle callbacks before the tick fires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedInput {
    pub peer: PeerKey,
    pub data: Vec<u8>,
}

/// Opaque deterministic simulation. Given identical inputs in identical
/// order, implementations must produce bit-exact identical state, and
/// `state_hash` must depend only on that state.
pub trait World {
    /// Advances the world exactly one step. `inputs` arrive sorted
    /// ascending by the peers' canonical ids. During rollback the same
    /// frame number is ticked again; implementations must not assume
    /// frame numbers form a strictly increasing sequence.
    fn tick(&mut self, frame: Frame, inputs: &[AppliedInput]) -> Result<(), WorldError>;

    /// Bit-exact serialization of the current state.
    fn snapshot(&mut self) -> Vec<u8>;

    /// Restores state from a `snapshot()` payload.
    fn load_snapshot(&mut self, bytes: &[u8]) -> Result<(), WorldError>;

    /// 32-bit fingerprint over the canonical entity ordering.
    fn state_hash(&self) -> u32;

    fn entity_count(&self) -> u32;

    /// Serializes the entities with `id mod num_partitions == partition`,
    /// sorted by entity id.
    fn partition_delta(&self, partition: PartitionId, num_partitions: PartitionId) -> Vec<u8>;

    /// Merges a received partition payload into the view of
    /// remote-authoritative state. Must be idempotent: the same payload
    /// may arrive more than once across a partition-count transition.
    fn apply_partition_delta(
        &mut self,
        partition: PartitionId,
        bytes: &[u8],
    ) -> Result<(), WorldError>;
}
