//! Classification of how complete a frame's delta delivery was.

/// Outcome of a frame's delta collection, decided at the delta deadline.
/// Comparisons are integer-only: the 3/4 and 1/4 thresholds are scaled
/// by four so they stay exact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DegradationTier {
    /// Every partition arrived and every assigned sender delivered.
    Normal,
    /// More than three quarters of partitions arrived.
    Degraded,
    /// More than one quarter of partitions arrived.
    Minimal,
    /// Too little arrived; skip delta application for the frame.
    Skip,
}

impl DegradationTier {
    pub fn classify(
        total_partitions: u16,
        received_partitions: u16,
        trusted_senders: usize,
        total_senders: usize,
    ) -> Self {
        if received_partitions == total_partitions && trusted_senders == total_senders {
            return DegradationTier::Normal;
        }
        let received = u32::from(received_partitions);
        let total = u32::from(total_partitions);
        if received * 4 > total * 3 {
            DegradationTier::Degraded
        } else if received * 4 > total {
            DegradationTier::Minimal
        } else {
            DegradationTier::Skip
        }
    }

    /// Whether collected deltas should be merged at all.
    pub fn applies_deltas(self) -> bool {
        self != DegradationTier::Skip
    }
}
