//! Distributed state-hash consensus.
//!
//! Peers broadcast `{frame, state_hash}` fingerprints; the arbiter
//! aggregates them per frame, computes the strict-majority hash once a
//! frame's reports are complete or its deadline passes, and diagnoses
//! the local peer as desynced when it disagrees with the majority.

use std::collections::{BTreeMap, HashMap};

use log::{debug, warn};

use crate::peer::PeerKey;
use crate::types::Frame;

/// Details of a detected divergence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DesyncInfo {
    pub frame: Frame,
    pub local_hash: u32,
    pub majority_hash: u32,
}

/// Outcome of arbitrating one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashVerdict {
    Passed { frame: Frame },
    Failed { frame: Frame, local_hash: u32, majority_hash: u32 },
    /// Reports split with no hash holding a strict majority. Counted
    /// toward neither passed nor failed.
    NoMajority { frame: Frame },
}

pub struct HashArbiter {
    hash_window: Frame,
    ack_window: Frame,
    /// Per-frame hash reports, local peer included.
    reports: BTreeMap<Frame, HashMap<PeerKey, u32>>,
    /// Local hash per frame, kept separately for the comparison.
    locals: BTreeMap<Frame, u32>,
    /// Relay-declared majority hashes (TICK hints); authoritative.
    references: BTreeMap<Frame, u32>,
    passed: u64,
    failed: u64,
    desync: Option<DesyncInfo>,
}

impl HashArbiter {
    pub fn new(hash_window: Frame, ack_window: Frame) -> Self {
        Self {
            hash_window,
            ack_window,
            reports: BTreeMap::new(),
            locals: BTreeMap::new(),
            references: BTreeMap::new(),
            passed: 0,
            failed: 0,
            desync: None,
        }
    }

    /// Records the local peer's hash for a frame.
    pub fn record_local(&mut self, frame: Frame, local: PeerKey, hash: u32) {
        self.locals.insert(frame, hash);
        self.reports.entry(frame).or_default().insert(local, hash);
    }

    /// Records a remote peer's hash report for a frame.
    pub fn record_peer(&mut self, frame: Frame, peer: PeerKey, hash: u32) {
        self.reports.entry(frame).or_default().insert(peer, hash);
    }

    /// Records an authoritative majority hash carried by a tick message.
    pub fn note_reference(&mut self, frame: Frame, hash: u32) {
        self.references.insert(frame, hash);
    }

    /// Arbitrates every frame that is ready: all `active_count` peers
    /// reported, a reference hash is known, or the deadline
    /// (`frame + ack_window`) has passed. Old frames are evicted.
    pub fn poll(&mut self, current_frame: Frame, active_count: usize) -> Vec<HashVerdict> {
        let mut verdicts = Vec::new();
        let ready: Vec<Frame> = self
            .locals
            .keys()
            .copied()
            .filter(|f| {
                self.references.contains_key(f)
                    || current_frame >= f.saturating_add(self.ack_window)
                    || self
                        .reports
                        .get(f)
                        .map(|r| r.len() >= active_count)
                        .unwrap_or(false)
            })
            .collect();

        for frame in ready {
            if let Some(verdict) = self.arbitrate(frame) {
                verdicts.push(verdict);
            }
        }

        let horizon = current_frame.saturating_sub(self.hash_window);
        self.reports = self.reports.split_off(&horizon);
        self.locals = self.locals.split_off(&horizon);
        self.references = self.references.split_off(&horizon);

        verdicts
    }

    fn arbitrate(&mut self, frame: Frame) -> Option<HashVerdict> {
        let local_hash = self.locals.remove(&frame)?;
        let reports = self.reports.remove(&frame).unwrap_or_default();
        let reference = self.references.remove(&frame);

        let majority_hash = match reference {
            Some(hash) => hash,
            None => match majority_of(&reports) {
                Some(hash) => hash,
                None => {
                    warn!(
                        "no majority hash at frame {frame} ({} reports)",
                        reports.len()
                    );
                    return Some(HashVerdict::NoMajority { frame });
                }
            },
        };

        if local_hash == majority_hash {
            self.passed += 1;
            Some(HashVerdict::Passed { frame })
        } else {
            debug!(
                "state hash mismatch at frame {frame}: local {local_hash:#010x}, majority {majority_hash:#010x}"
            );
            self.failed += 1;
            self.desync = Some(DesyncInfo {
                frame,
                local_hash,
                majority_hash,
            });
            Some(HashVerdict::Failed {
                frame,
                local_hash,
                majority_hash,
            })
        }
    }

    pub fn is_desynced(&self) -> bool {
        self.desync.is_some()
    }

    pub fn desync(&self) -> Option<&DesyncInfo> {
        self.desync.as_ref()
    }

    /// Clears the desync flag after an authoritative snapshot load.
    pub fn clear_desync(&mut self) {
        self.desync = None;
    }

    /// Drops everything recorded up to and including `frame` and clears
    /// the desync flag. Used when a snapshot is adopted: hashes from
    /// the divergent timeline must not be arbitrated again.
    pub fn rebase(&mut self, frame: Frame) {
        let keep = frame.saturating_add(1);
        self.reports = self.reports.split_off(&keep);
        self.locals = self.locals.split_off(&keep);
        self.references = self.references.split_off(&keep);
        self.desync = None;
    }

    pub fn passed(&self) -> u64 {
        self.passed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// Share of arbitrated frames where the local hash matched, as a
    /// percentage. 100 when nothing has been arbitrated yet.
    pub fn sync_percent(&self) -> f64 {
        let total = self.passed + self.failed;
        if total == 0 {
            100.0
        } else {
            self.passed as f64 / total as f64 * 100.0
        }
    }

    pub fn reset(&mut self) {
        self.reports.clear();
        self.locals.clear();
        self.references.clear();
        self.passed = 0;
        self.failed = 0;
        self.desync = None;
    }
}

/// The hash reported by strictly more than half of the reports, if any.
/// When several hashes tie at the top, the smallest value wins the
/// candidacy before the strict-majority check.
fn majority_of(reports: &HashMap<PeerKey, u32>) -> Option<u32> {
    if reports.is_empty() {
        return None;
    }
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for hash in reports.values() {
        *counts.entry(*hash).or_insert(0) += 1;
    }
    let top_count = *counts.values().max().expect("counts is non-empty");
    let candidate = counts
        .iter()
        .filter(|(_, count)| **count == top_count)
        .map(|(hash, _)| *hash)
        .min()
        .expect("counts is non-empty");
    if top_count * 2 > reports.len() {
        Some(candidate)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerInterner;

    fn keys(n: usize) -> (PeerInterner, Vec<PeerKey>) {
        let mut interner = PeerInterner::new();
        let keys = (0..n)
            .map(|i| interner.intern(&format!("peer-{i}")))
            .collect();
        (interner, keys)
    }

    #[test]
    fn unanimous_reports_pass() {
        let (_, peers) = keys(3);
        let mut arbiter = HashArbiter::new(32, 3);
        arbiter.record_local(5, peers[0], 0xABCD);
        arbiter.record_peer(5, peers[1], 0xABCD);
        arbiter.record_peer(5, peers[2], 0xABCD);
        let verdicts = arbiter.poll(5, 3);
        assert_eq!(verdicts, vec![HashVerdict::Passed { frame: 5 }]);
        assert_eq!(arbiter.passed(), 1);
        assert!(!arbiter.is_desynced());
        assert_eq!(arbiter.sync_percent(), 100.0);
    }

    #[test]
    fn minority_local_hash_fails() {
        let (_, peers) = keys(3);
        let mut arbiter = HashArbiter::new(32, 3);
        arbiter.record_local(5, peers[0], 0x1111);
        arbiter.record_peer(5, peers[1], 0x2222);
        arbiter.record_peer(5, peers[2], 0x2222);
        let verdicts = arbiter.poll(5, 3);
        assert_eq!(
            verdicts,
            vec![HashVerdict::Failed {
                frame: 5,
                local_hash: 0x1111,
                majority_hash: 0x2222,
            }]
        );
        assert!(arbiter.is_desynced());
        assert_eq!(arbiter.desync().unwrap().frame, 5);
        assert_eq!(arbiter.failed(), 1);
    }

    #[test]
    fn even_split_emits_no_majority_and_counts_nothing() {
        let (_, peers) = keys(2);
        let mut arbiter = HashArbiter::new(32, 3);
        arbiter.record_local(5, peers[0], 0x1111);
        arbiter.record_peer(5, peers[1], 0x2222);
        let verdicts = arbiter.poll(5, 2);
        assert_eq!(verdicts, vec![HashVerdict::NoMajority { frame: 5 }]);
        assert_eq!(arbiter.passed(), 0);
        assert_eq!(arbiter.failed(), 0);
        assert!(!arbiter.is_desynced());
    }

    #[test]
    fn waits_for_ack_window_when_reports_missing() {
        let (_, peers) = keys(3);
        let mut arbiter = HashArbiter::new(32, 3);
        arbiter.record_local(5, peers[0], 0xAA);
        arbiter.record_peer(5, peers[1], 0xAA);
        // Only 2 of 3 reports and deadline not reached: nothing happens.
        assert!(arbiter.poll(6, 3).is_empty());
        // Deadline passes: 2/2 agreement is a strict majority.
        let verdicts = arbiter.poll(8, 3);
        assert_eq!(verdicts, vec![HashVerdict::Passed { frame: 5 }]);
    }

    #[test]
    fn reference_hash_overrides_peer_reports() {
        let (_, peers) = keys(2);
        let mut arbiter = HashArbiter::new(32, 3);
        arbiter.record_local(5, peers[0], 0x1111);
        arbiter.record_peer(5, peers[1], 0x1111);
        arbiter.note_reference(5, 0x2222);
        let verdicts = arbiter.poll(5, 2);
        assert_eq!(
            verdicts,
            vec![HashVerdict::Failed {
                frame: 5,
                local_hash: 0x1111,
                majority_hash: 0x2222,
            }]
        );
    }

    #[test]
    fn frames_are_arbitrated_once() {
        let (_, peers) = keys(2);
        let mut arbiter = HashArbiter::new(32, 3);
        arbiter.record_local(5, peers[0], 0xAA);
        arbiter.record_peer(5, peers[1], 0xAA);
        assert_eq!(arbiter.poll(5, 2).len(), 1);
        assert!(arbiter.poll(9, 2).is_empty());
        assert_eq!(arbiter.passed(), 1);
    }

    #[test]
    fn old_frames_are_evicted() {
        let (_, peers) = keys(2);
        let mut arbiter = HashArbiter::new(8, 3);
        arbiter.record_peer(5, peers[1], 0xAA);
        // Never got a local hash for frame 5; far-future poll drops it.
        arbiter.poll(100, 2);
        arbiter.record_local(5, peers[0], 0xAA);
        // Frame 5 is behind the retention horizon now, so the only
        // verdict possible comes from the freshly recorded local hash
        // alone at its deadline.
        let verdicts = arbiter.poll(100, 2);
        assert_eq!(verdicts, vec![HashVerdict::Passed { frame: 5 }]);
    }

    #[test]
    fn clear_desync_resets_flag_but_keeps_counters() {
        let (_, peers) = keys(3);
        let mut arbiter = HashArbiter::new(32, 3);
        arbiter.record_local(5, peers[0], 0x1);
        arbiter.record_peer(5, peers[1], 0x2);
        arbiter.record_peer(5, peers[2], 0x2);
        arbiter.poll(5, 3);
        assert!(arbiter.is_desynced());
        arbiter.clear_desync();
        assert!(!arbiter.is_desynced());
        assert_eq!(arbiter.failed(), 1);
    }
}
