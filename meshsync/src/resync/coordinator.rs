//! Snapshot-based resynchronization, requester and authority halves.
//!
//! Requester: after a desync the coordinator tracks the outstanding
//! snapshot request, re-requests on timeout, and gives up after the
//! configured number of attempts.
//!
//! Authority: a `resync_request` latches the target peer; the snapshot
//! is produced only after the next completed world tick so a
//! continuously spawning world is never served a stale cached state.

use log::{debug, info};

use crate::peer::PeerKey;

/// Requester-side outcome of a timeout poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResyncPoll {
    Idle,
    /// The previous request timed out; another should be sent.
    ReRequest { attempt: u32 },
    /// All attempts are exhausted; surface to the collaborator.
    TimedOut { attempts: u32 },
}

pub struct ResyncCoordinator {
    timeout_ms: u64,
    max_requests: u32,

    // Requester half
    pending: bool,
    attempts: u32,
    last_request_ms: u64,
    timeout_surfaced: bool,

    // Authority half: peers owed a fresh post-tick snapshot.
    pending_uploads: Vec<PeerKey>,
}

impl ResyncCoordinator {
    pub fn new(timeout_ms: u64, max_requests: u32) -> Self {
        Self {
            timeout_ms,
            max_requests,
            pending: false,
            attempts: 0,
            last_request_ms: 0,
            timeout_surfaced: false,
            pending_uploads: Vec::new(),
        }
    }

    // Requester half

    /// Begins a resync. Returns `false` if one is already in flight.
    pub fn start(&mut self, now_ms: u64) -> bool {
        if self.pending {
            return false;
        }
        info!("resync started");
        self.pending = true;
        self.attempts = 1;
        self.last_request_ms = now_ms;
        self.timeout_surfaced = false;
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Checks the outstanding request against the timeout.
    pub fn poll(&mut self, now_ms: u64) -> ResyncPoll {
        if !self.pending || self.timeout_surfaced {
            return ResyncPoll::Idle;
        }
        if now_ms.saturating_sub(self.last_request_ms) < self.timeout_ms {
            return ResyncPoll::Idle;
        }
        if self.attempts >= self.max_requests {
            self.timeout_surfaced = true;
            return ResyncPoll::TimedOut {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        self.last_request_ms = now_ms;
        debug!("re-requesting snapshot, attempt {}", self.attempts);
        ResyncPoll::ReRequest {
            attempt: self.attempts,
        }
    }

    /// Marks the resync finished after a snapshot was adopted.
    pub fn complete(&mut self) {
        self.pending = false;
        self.attempts = 0;
        self.timeout_surfaced = false;
    }

    // Authority half

    /// Latches `peer` for a snapshot upload after the next tick.
    pub fn latch_upload(&mut self, peer: PeerKey) {
        if !self.pending_uploads.contains(&peer) {
            self.pending_uploads.push(peer);
        }
    }

    pub fn has_uploads(&self) -> bool {
        !self.pending_uploads.is_empty()
    }

    /// Takes the latched targets, clearing the latch.
    pub fn take_uploads(&mut self) -> Vec<PeerKey> {
        std::mem::take(&mut self.pending_uploads)
    }

    pub fn reset(&mut self) {
        self.pending = false;
        self.attempts = 0;
        self.last_request_ms = 0;
        self.timeout_surfaced = false;
        self.pending_uploads.clear();
    }
}
