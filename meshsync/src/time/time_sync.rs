//! Clock offset and latency estimation from ping samples, plus the
//! tick-rate multiplier that keeps the prediction horizon bounded.
//!
//! All timestamps are monotonic milliseconds supplied by the caller;
//! the core never reads a wall clock.

use std::collections::VecDeque;

/// Samples retained by the median filters.
const SAMPLE_WINDOW: usize = 16;
/// Samples required before estimates are considered trustworthy.
const MIN_SAMPLES: usize = 4;

/// Prediction depth the pace controller steers toward.
const TARGET_DEPTH: u32 = 4;
/// Consecutive observations on one side of the target before the
/// multiplier moves.
const ADJUST_STREAK: u32 = 8;
/// Maximum multiplier change per adjustment.
const ADJUST_STEP: f64 = 0.005;
/// Band the per-direction adjustments stay within.
const SPEED_UP_CEILING: f64 = 1.05;
const SLOW_DOWN_FLOOR: f64 = 0.95;
/// Hard clamp on the multiplier.
const MULTIPLIER_MIN: f64 = 0.90;
const MULTIPLIER_MAX: f64 = 1.10;

pub struct TimeSyncManager {
    /// (clock delta ms, round trip ms) pairs, newest at the back.
    samples: VecDeque<(i64, u64)>,
    multiplier: f64,
    above_streak: u32,
    below_streak: u32,
}

impl TimeSyncManager {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(SAMPLE_WINDOW),
            multiplier: 1.0,
            above_streak: 0,
            below_streak: 0,
        }
    }

    /// Feeds one completed ping round trip. `t_send` and `t_recv` are
    /// local monotonic times; `t_server` is the remote's receive stamp.
    pub fn on_pong(&mut self, t_send: u64, t_server: u64, t_recv: u64) {
        let rtt = t_recv.saturating_sub(t_send);
        let one_way = rtt / 2;
        let clock_delta = t_server as i64 - (t_send + one_way) as i64;
        if self.samples.len() == SAMPLE_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back((clock_delta, rtt));
    }

    /// Whether enough samples have been collected for the estimates to
    /// be meaningful.
    pub fn is_synced(&self) -> bool {
        self.samples.len() >= MIN_SAMPLES
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Median round-trip latency in milliseconds.
    pub fn estimated_latency(&self) -> u64 {
        median(self.samples.iter().map(|(_, rtt)| *rtt as i64)).max(0) as u64
    }

    /// Median estimated offset of the remote clock from the local one.
    pub fn clock_delta(&self) -> i64 {
        median(self.samples.iter().map(|(delta, _)| *delta))
    }

    /// Current tick pace multiplier, in [0.90, 1.10].
    pub fn tick_rate_multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Observes the prediction depth after a tick. Depth consistently
    /// past the target speeds the local pace up; depth consistently
    /// under it slows the pace down. Each adjustment moves the
    /// multiplier by at most [`ADJUST_STEP`].
    pub fn observe_prediction_depth(&mut self, depth: u32) {
        if depth > TARGET_DEPTH {
            self.above_streak += 1;
            self.below_streak = 0;
            if self.above_streak >= ADJUST_STREAK {
                self.multiplier = (self.multiplier + ADJUST_STEP).min(SPEED_UP_CEILING);
            }
        } else if depth < TARGET_DEPTH {
            self.below_streak += 1;
            self.above_streak = 0;
            if self.below_streak >= ADJUST_STREAK {
                self.multiplier = (self.multiplier - ADJUST_STEP).max(SLOW_DOWN_FLOOR);
            }
        } else {
            self.above_streak = 0;
            self.below_streak = 0;
        }
        self.multiplier = self.multiplier.clamp(MULTIPLIER_MIN, MULTIPLIER_MAX);
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.multiplier = 1.0;
        self.above_streak = 0;
        self.below_streak = 0;
    }
}

/// Median of an integer sequence; the mean of the two middle values for
/// even counts, 0 for an empty sequence.
fn median(values: impl Iterator<Item = i64>) -> i64 {
    let mut sorted: Vec<i64> = values.collect();
    if sorted.is_empty() {
        return 0;
    }
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2
    }
}
