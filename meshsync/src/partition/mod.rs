pub mod assignment;
pub mod degradation;

pub use assignment::{
    assign, entity_partition, num_partitions, Assignment, ENTITIES_PER_PARTITION,
};
pub use degradation::DegradationTier;
