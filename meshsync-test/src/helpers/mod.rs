pub mod cluster;
pub mod loopback;
pub mod mock_world;
pub mod recorder;
pub mod relay;

pub use cluster::{Cluster, STEP_MS};
pub use loopback::Loopback;
pub use mock_world::MockWorld;
pub use recorder::RecordingObserver;
pub use relay::Relay;
