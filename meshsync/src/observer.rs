//! Structured observability events.
//!
//! The core never writes to stdout on production paths. Diagnostics go
//! through the `log` facade, and everything a collaborator might react
//! to is delivered as a typed event to the observer passed in at engine
//! construction. Only `ResyncTimeout` and `Fatal` represent surfaced
//! failures; the rest are informational.

use crate::partition::DegradationTier;
use crate::types::Frame;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    /// Local state hash diverged from the majority at `frame`.
    DesyncDetected {
        frame: Frame,
        local_hash: u32,
        majority_hash: u32,
    },
    /// A desync was cleared by adopting an authoritative snapshot.
    DesyncCleared { frame: Frame },
    /// A snapshot request went out (attempt is 1-based).
    ResyncRequested { attempt: u32 },
    /// An authoritative snapshot was loaded and prediction resumed.
    ResyncCompleted { frame: Frame },
    /// No snapshot arrived after the configured number of requests.
    ResyncTimeout { attempts: u32 },
    /// The world was rewound and resimulated.
    RollbackExecuted { from: Frame, to: Frame },
    /// Hash reports split with no strict majority; diagnostics only.
    NoMajorityHash { frame: Frame },
    /// Delta delivery completeness changed tier.
    DegradationChanged {
        frame: Frame,
        tier: DegradationTier,
    },
    /// The world collaborator failed; the engine is suspended until
    /// `reset()`.
    Fatal { detail: String },
}

/// Observability collaborator. Implementations must tolerate events
/// arriving zero or more times before a `reset()` takes effect.
pub trait SyncObserver {
    fn notify(&mut self, event: &SyncEvent);
}

/// Discards all events.
pub struct NullObserver;

impl SyncObserver for NullObserver {
    fn notify(&mut self, _event: &SyncEvent) {}
}
