pub mod hash_arbiter;

pub use hash_arbiter::{DesyncInfo, HashArbiter, HashVerdict};
