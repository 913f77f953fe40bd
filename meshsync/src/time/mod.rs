pub mod time_sync;

pub use time_sync::TimeSyncManager;
