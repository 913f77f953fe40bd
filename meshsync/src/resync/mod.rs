pub mod coordinator;

pub use coordinator::{ResyncCoordinator, ResyncPoll};
