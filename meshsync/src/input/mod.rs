pub mod history;
pub mod lifecycle;

pub use history::{FrameInputs, InputHistory, InputRecord, LifecycleEntry};
pub use lifecycle::{InputPayload, LifecycleEvent, LifecycleKind};
