pub mod distributor;

pub use distributor::{DeltaDistributor, DeltaReport};
