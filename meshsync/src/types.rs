/// Simulation frame number. Frame 0 is the first simulated tick after
/// initialization. Frames are monotonic and never wrap.
pub type Frame = u32;

/// Per-peer monotonic input sequence number, assigned by the producer.
pub type InputSeq = u32;

/// Identifier of an entity partition: `entity_id mod num_partitions`.
pub type PartitionId = u16;
