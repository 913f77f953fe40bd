//! Engine configuration.

/// Tunable knobs for a [`crate::SyncEngine`]. Construct with
/// `SyncConfig::default()` and override fields as needed.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Target simulation ticks per second.
    pub tick_rate: u32,
    /// Maximum frames the local simulation may run ahead of the last
    /// confirmed frame; also the rollback budget.
    pub max_prediction_frames: u32,
    /// Frames of delay applied to locally produced inputs so they are
    /// confirmed before the local frame reaches them.
    pub input_delay_frames: u32,
    /// Redundant senders per entity partition.
    pub senders_per_partition: usize,
    /// Frames between mandatory snapshot saves.
    pub snapshot_interval: u32,
    /// Frames of state-hash retention in the arbiter.
    pub hash_window: u32,
    /// Frames to wait for peer hash reports before arbitrating.
    pub ack_window: u32,
    /// Frames between outbound hash broadcasts.
    pub hash_interval: u32,
    /// Extra frames granted to late deltas before the deadline tally.
    pub delta_grace_frames: u32,
    /// Milliseconds between outbound pings.
    pub ping_interval_ms: u64,
    /// Milliseconds to wait for a requested snapshot before re-requesting.
    pub resync_timeout_ms: u64,
    /// Snapshot request attempts before surfacing a resync timeout.
    pub max_resync_requests: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_rate: 20,
            max_prediction_frames: 10,
            input_delay_frames: 2,
            senders_per_partition: 2,
            snapshot_interval: 1,
            hash_window: 32,
            ack_window: 3,
            hash_interval: 1,
            delta_grace_frames: 1,
            ping_interval_ms: 1000,
            resync_timeout_ms: 5000,
            max_resync_requests: 3,
        }
    }
}

impl SyncConfig {
    /// Snapshot ring capacity implied by the rollback budget.
    pub fn snapshot_capacity(&self) -> usize {
        self.max_prediction_frames as usize + 2
    }
}
