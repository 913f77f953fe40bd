//! The top-level synchronization engine.
//!
//! Owns every subsystem and drives the per-tick data flow: drain the
//! inbound queue, advance prediction, emit deltas and the state hash,
//! settle delta deadlines, arbitrate hash consensus, and keep time sync
//! fed. All simulation-affecting state is touched only from here, at
//! fixed points; the transport appends to the inbound queue from
//! wherever it likes.

use std::collections::{HashMap, HashSet};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::config::SyncConfig;
use crate::consensus::{HashArbiter, HashVerdict};
use crate::delta::{DeltaDistributor, DeltaReport};
use crate::input::LifecycleKind;
use crate::messages::{MessageKind, Outbound, Recipient, SyncMessage};
use crate::observer::{SyncEvent, SyncObserver};
use crate::partition::DegradationTier;
use crate::peer::{PeerKey, PeerRegistry};
use crate::prediction::{ConfirmedInput, PredictionError, PredictionManager};
use crate::resync::{ResyncCoordinator, ResyncPoll};
use crate::time::TimeSyncManager;
use crate::transport::{channel, InboundMessage, InboundReceiver, InboundSender};
use crate::types::Frame;
use crate::world::World;

/// Errors surfaced by the engine's public surface
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A fatal world error occurred; only `reset()` recovers.
    #[error("engine is suspended after a fatal world error; call reset()")]
    Suspended,
}

/// Externally visible state of the engine, cheap to build.
#[derive(Clone, Debug)]
pub struct SyncStats {
    pub local_frame: Frame,
    pub confirmed_frame: Frame,
    pub prediction_depth: u32,

    pub sync_percent: f64,
    pub passed: u64,
    pub failed: u64,
    pub is_desynced: bool,
    pub resync_pending: bool,

    pub rollback_count: u64,
    pub frames_resimulated: u64,
    pub max_rollback_depth: u32,

    pub is_time_synced: bool,
    pub estimated_latency_ms: u64,
    pub clock_delta_ms: i64,
    pub tick_rate_multiplier: f64,

    pub active_peer_count: usize,
    pub stale_peers: Vec<String>,
    pub messages_received: u64,
    pub messages_sent: u64,
}

/// What one `advance` call did.
#[derive(Debug, Default)]
pub struct TickReport {
    pub advanced: bool,
    pub frame: Frame,
    pub rolled_back: bool,
    pub delta_reports: Vec<DeltaReport>,
}

#[derive(Default)]
struct MessageCounters {
    received: HashMap<MessageKind, u64>,
    sent: HashMap<MessageKind, u64>,
}

impl MessageCounters {
    fn count_received(&mut self, kind: MessageKind) {
        *self.received.entry(kind).or_insert(0) += 1;
    }

    fn count_sent(&mut self, kind: MessageKind) {
        *self.sent.entry(kind).or_insert(0) += 1;
    }

    fn total_received(&self) -> u64 {
        self.received.values().sum()
    }

    fn total_sent(&self) -> u64 {
        self.sent.values().sum()
    }
}

pub struct SyncEngine {
    config: SyncConfig,
    local_id: String,
    local_key: PeerKey,

    registry: PeerRegistry,
    prediction: PredictionManager,
    time_sync: TimeSyncManager,
    arbiter: HashArbiter,
    resync: ResyncCoordinator,
    delta: DeltaDistributor,

    inbound: InboundReceiver,
    inbound_sender: InboundSender,
    outgoing: Vec<Outbound>,
    observer: Box<dyn SyncObserver>,

    suspended: bool,
    last_ping_ms: Option<u64>,
    last_tier: Option<DegradationTier>,
    /// Peers whose entities arrived via an adopted snapshot. The first
    /// join re-announced for such a peer is suppressed so connect
    /// effects do not fire twice; any later join fires normally.
    populated_from_snapshot: HashSet<PeerKey>,
    counters: MessageCounters,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, local_id: &str, observer: Box<dyn SyncObserver>) -> Self {
        let mut registry = PeerRegistry::new();
        // The local peer is interned first so its key survives a
        // registry rebuild in reset().
        let local_key = registry.activate(local_id, 0);
        let prediction = PredictionManager::new(&config, local_key);
        let arbiter = HashArbiter::new(config.hash_window, config.ack_window);
        let resync = ResyncCoordinator::new(config.resync_timeout_ms, config.max_resync_requests);
        let delta = DeltaDistributor::new(
            local_key,
            config.senders_per_partition,
            config.delta_grace_frames,
        );
        let (inbound_sender, inbound) = channel();
        Self {
            config,
            local_id: local_id.to_string(),
            local_key,
            registry,
            prediction,
            time_sync: TimeSyncManager::new(),
            arbiter,
            resync,
            delta,
            inbound,
            inbound_sender,
            outgoing: Vec::new(),
            observer,
            suspended: false,
            last_ping_ms: None,
            last_tier: None,
            populated_from_snapshot: HashSet::new(),
            counters: MessageCounters::default(),
        }
    }

    // Public surface

    /// A cloneable handle the transport uses to enqueue inbound
    /// messages from any thread.
    pub fn inbound_sender(&self) -> InboundSender {
        self.inbound_sender.clone()
    }

    /// Messages the transport should deliver, drained by the caller.
    pub fn take_outgoing(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outgoing)
    }

    /// Queues a locally produced game input into the delayed slot.
    pub fn queue_local_input(&mut self, data: Vec<u8>) {
        self.prediction.queue_local_input(data);
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn prediction(&self) -> &PredictionManager {
        &self.prediction
    }

    /// Mutable access for collaborators registering callback slots.
    pub fn prediction_mut(&mut self) -> &mut PredictionManager {
        &mut self.prediction
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn stats(&self) -> SyncStats {
        let prediction_stats = self.prediction.stats();
        let frame = self.prediction.local_frame();
        let stale_window = self.config.hash_window * 2;
        SyncStats {
            local_frame: frame,
            confirmed_frame: self.prediction.confirmed_frame(),
            prediction_depth: self.prediction.prediction_depth(),
            sync_percent: self.arbiter.sync_percent(),
            passed: self.arbiter.passed(),
            failed: self.arbiter.failed(),
            is_desynced: self.arbiter.is_desynced(),
            resync_pending: self.resync.is_pending(),
            rollback_count: prediction_stats.rollback_count,
            frames_resimulated: prediction_stats.frames_resimulated,
            max_rollback_depth: prediction_stats.max_rollback_depth,
            is_time_synced: self.time_sync.is_synced(),
            estimated_latency_ms: self.time_sync.estimated_latency(),
            clock_delta_ms: self.time_sync.clock_delta(),
            tick_rate_multiplier: self.time_sync.tick_rate_multiplier(),
            active_peer_count: self.registry.active_count(),
            stale_peers: self
                .registry
                .stale_peers(frame, stale_window)
                .into_iter()
                .filter(|key| *key != self.local_key)
                .map(|key| self.registry.interner().resolve(key).to_string())
                .collect(),
            messages_received: self.counters.total_received(),
            messages_sent: self.counters.total_sent(),
        }
    }

    /// Discards queues, rings, histories, timers, and peer membership,
    /// restoring construction state. The inbound sender handle stays
    /// valid.
    pub fn reset(&mut self) {
        self.prediction.reset();
        self.time_sync.reset();
        self.arbiter.reset();
        self.resync.reset();
        self.delta.reset();
        self.inbound.clear();
        self.outgoing.clear();
        self.suspended = false;
        self.last_ping_ms = None;
        self.last_tier = None;
        self.populated_from_snapshot.clear();
        self.counters = MessageCounters::default();
        self.registry.clear();
        // Re-interning first keeps the local key identical to the one
        // baked into the prediction manager and delta distributor.
        let key = self.registry.activate(&self.local_id, 0);
        debug_assert_eq!(key, self.local_key);
        info!("sync engine reset");
    }

    /// Runs one engine step: drain inbound messages, then advance the
    /// local simulation and emit this frame's outbound traffic.
    /// `now_ms` is any monotonic millisecond clock; the engine never
    /// reads time itself.
    pub fn advance<W: World>(
        &mut self,
        world: &mut W,
        now_ms: u64,
    ) -> Result<TickReport, EngineError> {
        if self.suspended {
            return Err(EngineError::Suspended);
        }

        let mut report = TickReport {
            advanced: false,
            frame: self.prediction.local_frame(),
            rolled_back: false,
            delta_reports: Vec::new(),
        };

        // Inbound messages are applied only here, never mid-tick.
        for inbound in self.inbound.drain() {
            if let Err(fatal) = self.dispatch(world, inbound, now_ms, &mut report) {
                self.enter_suspended(&fatal);
                return Err(EngineError::Suspended);
            }
        }

        // Requester-side resync timeout management.
        match self.resync.poll(now_ms) {
            ResyncPoll::ReRequest { attempt } => self.send_resync_request(attempt),
            ResyncPoll::TimedOut { attempts } => {
                self.observer.notify(&SyncEvent::ResyncTimeout { attempts });
            }
            ResyncPoll::Idle => {}
        }

        let outcome = match self.prediction.advance(world, &mut self.registry) {
            Ok(outcome) => outcome,
            Err(fatal) => {
                self.enter_suspended(&fatal);
                return Err(EngineError::Suspended);
            }
        };

        if outcome.advanced {
            report.advanced = true;
            report.frame = outcome.frame;
            self.latch_resync_requests(&outcome.resync_requests);
            self.serve_pending_snapshots(world, outcome.frame);
            self.emit_deltas(world, outcome.frame);
            self.broadcast_hash(world, outcome.frame);
            self.time_sync
                .observe_prediction_depth(self.prediction.prediction_depth());
        }

        let current = self.prediction.local_frame();
        report.delta_reports =
            self.delta
                .finalize_due(world, &mut self.registry, current);
        for delta_report in &report.delta_reports {
            if self.last_tier != Some(delta_report.tier) {
                self.last_tier = Some(delta_report.tier);
                self.observer.notify(&SyncEvent::DegradationChanged {
                    frame: delta_report.frame,
                    tier: delta_report.tier,
                });
            }
        }

        let verdicts = self.arbiter.poll(current, self.registry.active_count());
        for verdict in verdicts {
            match verdict {
                HashVerdict::Passed { .. } => {}
                HashVerdict::NoMajority { frame } => {
                    self.observer.notify(&SyncEvent::NoMajorityHash { frame });
                }
                HashVerdict::Failed {
                    frame,
                    local_hash,
                    majority_hash,
                } => {
                    self.observer.notify(&SyncEvent::DesyncDetected {
                        frame,
                        local_hash,
                        majority_hash,
                    });
                    if self.resync.start(now_ms) {
                        self.send_resync_request(1);
                    }
                }
            }
        }

        self.maybe_ping(now_ms);

        Ok(report)
    }

    // Inbound handling

    fn dispatch<W: World>(
        &mut self,
        world: &mut W,
        inbound: InboundMessage,
        now_ms: u64,
        report: &mut TickReport,
    ) -> Result<(), PredictionError> {
        let InboundMessage { from, message } = inbound;
        self.counters.count_received(message.kind());
        let sender = self.registry.intern(&from);
        self.registry.mark_seen(sender, self.prediction.local_frame());

        match message {
            SyncMessage::Tick {
                frame,
                inputs,
                majority_hash,
            } => {
                if let Some(hash) = majority_hash {
                    self.arbiter.note_reference(frame, hash);
                }
                let confirmed: Vec<ConfirmedInput> = inputs
                    .into_iter()
                    .map(|input| ConfirmedInput {
                        peer: self.registry.intern(&input.client),
                        seq: input.seq,
                        payload: input.payload,
                    })
                    .collect();
                let receipt = self.prediction.receive_server_tick(
                    world,
                    &mut self.registry,
                    frame,
                    confirmed,
                )?;
                if receipt.rolled_back {
                    report.rolled_back = true;
                    self.observer.notify(&SyncEvent::RollbackExecuted {
                        from: self.prediction.local_frame(),
                        to: frame,
                    });
                }
                self.latch_resync_requests(&receipt.resync_requests);
            }
            SyncMessage::Hash { frame, hash } => {
                self.arbiter.record_peer(frame, sender, hash);
            }
            SyncMessage::Delta {
                frame,
                partition,
                entities,
            } => {
                self.delta.receive(frame, sender, partition, entities);
            }
            SyncMessage::Snapshot { frame, hash, bytes } => {
                self.adopt_snapshot(world, frame, hash, &bytes)?;
            }
            SyncMessage::Ping { t_send } => {
                self.push_outbound(
                    Recipient::To(from),
                    SyncMessage::Pong {
                        t_send,
                        t_server: now_ms,
                    },
                );
            }
            SyncMessage::Pong { t_send, t_server } => {
                self.time_sync.on_pong(t_send, t_server, now_ms);
            }
            SyncMessage::Join { peer } => {
                let key = self.registry.intern(&peer);
                if self.populated_from_snapshot.remove(&key) {
                    // This peer's state already arrived inside the
                    // adopted snapshot; re-announcing the join must not
                    // fire connect effects a second time.
                    debug!("join for snapshot-populated peer {peer} suppressed");
                } else {
                    self.prediction
                        .queue_local_lifecycle(LifecycleKind::Join, &peer);
                }
            }
            SyncMessage::Leave { peer } => {
                if self.registry.interner().get(&peer).is_none() {
                    debug!("leave for unknown peer {peer} ignored");
                } else {
                    self.prediction
                        .queue_local_lifecycle(LifecycleKind::Leave, &peer);
                }
            }
            SyncMessage::RequestResync { peer } => {
                let key = self.registry.intern(&peer);
                self.latch_resync_requests(&[key]);
            }
        }
        Ok(())
    }

    // Resync plumbing

    /// Authority side: remember who needs a fresh snapshot. Only the
    /// designated authority serves uploads, and never to itself.
    fn latch_resync_requests(&mut self, requesters: &[PeerKey]) {
        if self.registry.authority() != Some(self.local_key) {
            return;
        }
        for requester in requesters {
            if *requester != self.local_key {
                self.resync.latch_upload(*requester);
            }
        }
    }

    /// Authority side: a latched request is served with a snapshot
    /// produced after the tick that just completed, never a cached one;
    /// the world may be spawning entities continuously.
    fn serve_pending_snapshots<W: World>(&mut self, world: &mut W, frame: Frame) {
        if !self.resync.has_uploads() {
            return;
        }
        let bytes = world.snapshot();
        let hash = world.state_hash();
        for target in self.resync.take_uploads() {
            if !self.registry.is_active(target) {
                debug!("dropping snapshot upload to departed peer");
                continue;
            }
            let id = self.registry.interner().resolve(target).to_string();
            info!("serving resync snapshot for frame {frame} to {id}");
            self.push_outbound(
                Recipient::To(id),
                SyncMessage::Snapshot {
                    frame,
                    hash,
                    bytes: bytes.clone(),
                },
            );
        }
    }

    /// Requester side: emit the snapshot request toward the authority
    /// and route the `resync_request` lifecycle input through the
    /// normal input channel so it is ordered with other inputs.
    fn send_resync_request(&mut self, attempt: u32) {
        self.prediction
            .queue_local_lifecycle(LifecycleKind::ResyncRequest, &self.local_id);
        match self.registry.authority() {
            Some(authority) if authority != self.local_key => {
                let id = self.registry.interner().resolve(authority).to_string();
                self.push_outbound(
                    Recipient::To(id),
                    SyncMessage::RequestResync {
                        peer: self.local_id.clone(),
                    },
                );
            }
            _ => {
                warn!("no remote authority available to serve a resync snapshot");
            }
        }
        self.observer.notify(&SyncEvent::ResyncRequested { attempt });
    }

    /// Requester side: adopt an authoritative snapshot. Prediction is
    /// paused for the load, all divergent-timeline state is dropped,
    /// and the simulation resumes at the snapshot's frame.
    fn adopt_snapshot<W: World>(
        &mut self,
        world: &mut W,
        frame: Frame,
        hash: u32,
        bytes: &[u8],
    ) -> Result<(), PredictionError> {
        if !self.resync.is_pending() {
            debug!("ignoring unsolicited snapshot for frame {frame}");
            return Ok(());
        }
        self.prediction.pause();
        world.load_snapshot(bytes).map_err(PredictionError::from)?;
        let loaded_hash = world.state_hash();
        if loaded_hash != hash {
            warn!(
                "adopted snapshot hash mismatch at frame {frame}: got {loaded_hash:#010x}, expected {hash:#010x}"
            );
        }

        self.prediction.adopt_snapshot_frame(frame);
        self.arbiter.rebase(frame);
        self.delta.reset();
        // Restart the populated set: peers materialized by this
        // snapshot get their re-announced join suppressed, while
        // genuinely new peers still join normally.
        self.populated_from_snapshot.clear();
        for peer in self.registry.active_peers() {
            if *peer != self.local_key {
                self.populated_from_snapshot.insert(*peer);
            }
        }
        self.resync.complete();
        self.prediction.resume();

        self.observer.notify(&SyncEvent::DesyncCleared { frame });
        self.observer.notify(&SyncEvent::ResyncCompleted { frame });
        info!("resync complete at frame {frame}");
        Ok(())
    }

    // Per-frame outbound traffic

    fn emit_deltas<W: World>(&mut self, world: &W, frame: Frame) {
        if self.registry.active_count() < 2 || world.entity_count() == 0 {
            return;
        }
        let mut emitted = Vec::new();
        self.delta.emit(world, &self.registry, frame, &mut emitted);
        for outbound in emitted {
            self.counters.count_sent(outbound.message.kind());
            self.outgoing.push(outbound);
        }
    }

    fn broadcast_hash<W: World>(&mut self, world: &W, frame: Frame) {
        if frame % self.config.hash_interval.max(1) != 0 {
            return;
        }
        let hash = world.state_hash();
        self.arbiter.record_local(frame, self.local_key, hash);
        self.push_outbound(Recipient::Broadcast, SyncMessage::Hash { frame, hash });
    }

    fn maybe_ping(&mut self, now_ms: u64) {
        let due = match self.last_ping_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.config.ping_interval_ms,
        };
        if due && self.registry.active_count() > 1 {
            self.last_ping_ms = Some(now_ms);
            self.push_outbound(Recipient::Broadcast, SyncMessage::Ping { t_send: now_ms });
        }
    }

    fn push_outbound(&mut self, recipient: Recipient, message: SyncMessage) {
        self.counters.count_sent(message.kind());
        self.outgoing.push(Outbound { recipient, message });
    }

    fn enter_suspended(&mut self, fatal: &PredictionError) {
        error!("fatal world error: {fatal}");
        self.observer.notify(&SyncEvent::Fatal {
            detail: fatal.to_string(),
        });
        self.suspended = true;
    }
}
