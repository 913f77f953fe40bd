//! Client-side prediction, rollback, and resimulation.
//!
//! The manager runs the local world ahead of the last confirmed frame,
//! predicting absent remote inputs by repeating each peer's most recent
//! confirmed input. When authoritative inputs disagree with what was
//! simulated, the world is rewound to a snapshot and resimulated with
//! the corrected history. Frame bookkeeping: frame 0 is the initial
//! (never ticked) state; the first advance simulates frame 1.

use log::warn;
use thiserror::Error;

use crate::config::SyncConfig;
use crate::input::{
    InputHistory, InputPayload, InputRecord, LifecycleEvent, LifecycleKind,
};
use crate::peer::{PeerKey, PeerRegistry};
use crate::snapshot::{Snapshot, SnapshotRing};
use crate::types::{Frame, InputSeq};
use crate::world::{AppliedInput, World, WorldError};

/// Errors that can occur while advancing or rolling back the simulation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredictionError {
    /// The world collaborator failed; the engine must suspend.
    #[error("world failure during prediction: {source}")]
    World {
        #[from]
        source: WorldError,
    },
}

/// Counters describing rollback activity since construction or reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PredictionStats {
    pub rollback_count: u64,
    pub frames_resimulated: u64,
    pub max_rollback_depth: u32,
}

/// One authoritative input delivered by a tick message, with the
/// producer already interned.
#[derive(Clone, Debug)]
pub struct ConfirmedInput {
    pub peer: PeerKey,
    pub seq: InputSeq,
    pub payload: InputPayload,
}

/// What happened during one `advance` call.
#[derive(Debug, Default)]
pub struct AdvanceOutcome {
    pub advanced: bool,
    pub frame: Frame,
    /// Peers whose `resync_request` lifecycle events fired this call.
    pub resync_requests: Vec<PeerKey>,
}

/// What happened while processing one authoritative tick.
#[derive(Debug, Default)]
pub struct TickReceipt {
    pub rolled_back: bool,
    /// The tick confirmed a frame older than the confirmed frame and
    /// was dropped.
    pub stale: bool,
    pub resync_requests: Vec<PeerKey>,
}

pub type RollbackCallback = Box<dyn FnMut(Frame, Frame)>;
pub type LifecycleCallback = Box<dyn FnMut(Frame, &LifecycleEvent)>;
pub type InputsCallback = Box<dyn FnMut(Frame, &mut Vec<AppliedInput>)>;

pub struct PredictionManager {
    max_prediction_frames: u32,
    input_delay_frames: u32,
    snapshot_interval: u32,

    local_peer: PeerKey,
    local_frame: Frame,
    confirmed_frame: Frame,
    enabled: bool,
    local_seq: InputSeq,

    history: InputHistory,
    ring: SnapshotRing,
    stats: PredictionStats,

    // Callback slots. Setting a slot replaces the previous value;
    // subscribers never chain.
    on_rollback: Option<RollbackCallback>,
    on_lifecycle_event: Option<LifecycleCallback>,
    on_undo_lifecycle_event: Option<LifecycleCallback>,
    inputs_callback: Option<InputsCallback>,
}

impl PredictionManager {
    pub fn new(config: &SyncConfig, local_peer: PeerKey) -> Self {
        Self {
            max_prediction_frames: config.max_prediction_frames,
            input_delay_frames: config.input_delay_frames,
            snapshot_interval: config.snapshot_interval.max(1),
            local_peer,
            local_frame: 0,
            confirmed_frame: 0,
            enabled: true,
            local_seq: 0,
            history: InputHistory::new(),
            ring: SnapshotRing::new(config.snapshot_capacity()),
            stats: PredictionStats::default(),
            on_rollback: None,
            on_lifecycle_event: None,
            on_undo_lifecycle_event: None,
            inputs_callback: None,
        }
    }

    // Accessors

    pub fn local_frame(&self) -> Frame {
        self.local_frame
    }

    pub fn confirmed_frame(&self) -> Frame {
        self.confirmed_frame
    }

    pub fn prediction_depth(&self) -> u32 {
        self.local_frame - self.confirmed_frame
    }

    pub fn stats(&self) -> PredictionStats {
        self.stats
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn history(&self) -> &InputHistory {
        &self.history
    }

    // Callback slots

    pub fn set_on_rollback(&mut self, callback: RollbackCallback) {
        self.on_rollback = Some(callback);
    }

    pub fn set_on_lifecycle_event(&mut self, callback: LifecycleCallback) {
        self.on_lifecycle_event = Some(callback);
    }

    pub fn set_on_undo_lifecycle_event(&mut self, callback: LifecycleCallback) {
        self.on_undo_lifecycle_event = Some(callback);
    }

    pub fn set_inputs_callback(&mut self, callback: InputsCallback) {
        self.inputs_callback = Some(callback);
    }

    // Local input

    /// Queues a locally produced game input. It is placed
    /// `input_delay_frames` ahead and marked confirmed immediately, so
    /// the local frame can never mispredict against its own input.
    pub fn queue_local_input(&mut self, data: Vec<u8>) {
        let frame = self.local_frame + self.input_delay_frames;
        let record = InputRecord {
            seq: self.local_seq,
            payload: InputPayload::Game(data),
            confirmed: true,
        };
        self.local_seq += 1;
        self.history.set(frame, self.local_peer, record);
    }

    /// Routes a locally produced lifecycle event through the input
    /// channel; it fires on the next advance.
    pub fn queue_local_lifecycle(&mut self, kind: LifecycleKind, peer_id: &str) {
        let event = LifecycleEvent {
            kind,
            peer: peer_id.to_string(),
            seq: self.local_seq,
        };
        self.local_seq += 1;
        self.history.queue_lifecycle(self.local_frame + 1, event, false);
    }

    // Advance

    /// Advances the local simulation by one frame, unless prediction is
    /// paused or the prediction horizon is exhausted.
    pub fn advance<W: World>(
        &mut self,
        world: &mut W,
        registry: &mut PeerRegistry,
    ) -> Result<AdvanceOutcome, PredictionError> {
        let mut outcome = AdvanceOutcome {
            advanced: false,
            frame: self.local_frame,
            resync_requests: Vec::new(),
        };
        if !self.enabled || self.prediction_depth() >= self.max_prediction_frames {
            return Ok(outcome);
        }

        if self.local_frame % self.snapshot_interval == 0 {
            self.ring.save(Snapshot {
                frame: self.local_frame,
                hash: world.state_hash(),
                bytes: world.snapshot(),
            });
        }

        self.local_frame += 1;
        let frame = self.local_frame;
        let mut resync_requests = Vec::new();
        self.step(world, registry, frame, &mut resync_requests)?;

        let retain = self
            .confirmed_frame
            .saturating_sub(self.max_prediction_frames);
        self.history.evict_before(retain);

        outcome.advanced = true;
        outcome.frame = frame;
        outcome.resync_requests = resync_requests;
        Ok(outcome)
    }

    /// Simulates one frame: assemble inputs, offer them to the
    /// substitution hook, fire the frame's lifecycle events, then tick.
    fn step<W: World>(
        &mut self,
        world: &mut W,
        registry: &mut PeerRegistry,
        frame: Frame,
        resync_out: &mut Vec<PeerKey>,
    ) -> Result<(), PredictionError> {
        let mut inputs = self.assemble_inputs(frame, registry);
        if let Some(callback) = &mut self.inputs_callback {
            callback(frame, &mut inputs);
        }
        self.fire_lifecycle(frame, registry, resync_out);
        world.tick(frame, &inputs)?;
        Ok(())
    }

    /// Builds the frame's input set in ascending canonical peer order:
    /// the confirmed record where present, otherwise a repeat-last
    /// prediction which is also remembered as a predicted record.
    fn assemble_inputs(&mut self, frame: Frame, registry: &PeerRegistry) -> Vec<AppliedInput> {
        let mut inputs = Vec::with_capacity(registry.active_count());
        for &peer in registry.active_peers() {
            let confirmed = match self.history.get(frame, peer) {
                Some(record) if record.confirmed => {
                    Some(record.payload.as_game().map(<[u8]>::to_vec))
                }
                _ => None,
            };
            match confirmed {
                Some(Some(data)) => inputs.push(AppliedInput { peer, data }),
                // A confirmed non-game record holds nothing to tick.
                Some(None) => {}
                None => {
                    let data = self
                        .history
                        .last_confirmed_game(peer, frame.saturating_sub(1))
                        .map(<[u8]>::to_vec)
                        .unwrap_or_default();
                    self.history.set(
                        frame,
                        peer,
                        InputRecord {
                            seq: 0,
                            payload: InputPayload::Game(data.clone()),
                            confirmed: false,
                        },
                    );
                    inputs.push(AppliedInput { peer, data });
                }
            }
        }
        inputs
    }

    /// Fires the frame's not-yet-fired lifecycle events in producer
    /// sequence order, applying their membership effects first.
    fn fire_lifecycle(
        &mut self,
        frame: Frame,
        registry: &mut PeerRegistry,
        resync_out: &mut Vec<PeerKey>,
    ) {
        let pending: Vec<LifecycleEvent> = self
            .history
            .lifecycle_events(frame)
            .iter()
            .filter(|entry| !entry.fired)
            .map(|entry| entry.event.clone())
            .collect();
        if pending.is_empty() {
            return;
        }
        if let Some(entries) = self.history.lifecycle_events_mut(frame) {
            for entry in entries.iter_mut() {
                entry.fired = true;
            }
        }
        for event in &pending {
            let key = registry.apply_lifecycle(event, frame);
            if event.kind == LifecycleKind::ResyncRequest {
                resync_out.push(key);
            }
            if let Some(callback) = &mut self.on_lifecycle_event {
                callback(frame, event);
            }
        }
    }

    // Authoritative ticks

    /// Processes the authoritative inputs for `frame`.
    pub fn receive_server_tick<W: World>(
        &mut self,
        world: &mut W,
        registry: &mut PeerRegistry,
        frame: Frame,
        inputs: Vec<ConfirmedInput>,
    ) -> Result<TickReceipt, PredictionError> {
        let mut receipt = TickReceipt::default();

        if frame < self.confirmed_frame {
            receipt.stale = true;
            return Ok(receipt);
        }

        if frame > self.local_frame {
            self.store_future_tick(registry, frame, inputs, &mut receipt);
            return Ok(receipt);
        }

        let mut mispredicted = false;
        let mut forced_rollback = false;

        for input in &inputs {
            match &input.payload {
                InputPayload::Game(data) => {
                    let matches = match self.history.get(frame, input.peer) {
                        Some(existing) if existing.confirmed => {
                            existing.payload.as_game() == Some(data.as_slice())
                        }
                        // Missing entirely, or only a prediction.
                        _ => false,
                    };
                    if !matches {
                        mispredicted = true;
                    }
                    self.history.set(
                        frame,
                        input.peer,
                        InputRecord {
                            seq: input.seq,
                            payload: input.payload.clone(),
                            confirmed: true,
                        },
                    );
                }
                InputPayload::Lifecycle(event) => {
                    // Lifecycle at a simulated frame always diverges
                    // state, identical game inputs notwithstanding.
                    forced_rollback = true;
                    self.history.queue_lifecycle(frame, event.clone(), false);
                }
            }
        }

        self.confirmed_frame = self.confirmed_frame.max(frame);

        if mispredicted || forced_rollback {
            receipt.rolled_back =
                self.execute_rollback(world, registry, frame, &mut receipt.resync_requests)?;
        }
        Ok(receipt)
    }

    /// A tick ahead of the local frame: nothing to compare against, so
    /// no rollback, and the confirmed frame does not move (only its own
    /// input set is confirmed, not the frames in between). Lifecycle
    /// items fire immediately; game inputs are stored confirmed for
    /// when the local frame arrives.
    fn store_future_tick(
        &mut self,
        registry: &mut PeerRegistry,
        frame: Frame,
        inputs: Vec<ConfirmedInput>,
        receipt: &mut TickReceipt,
    ) {
        for input in inputs {
            match input.payload {
                InputPayload::Lifecycle(event) => {
                    self.history.queue_lifecycle(frame, event.clone(), true);
                    let key = registry.apply_lifecycle(&event, frame);
                    if event.kind == LifecycleKind::ResyncRequest {
                        receipt.resync_requests.push(key);
                    }
                    if let Some(callback) = &mut self.on_lifecycle_event {
                        callback(frame, &event);
                    }
                }
                InputPayload::Game(_) => {
                    self.history.set(
                        frame,
                        input.peer,
                        InputRecord {
                            seq: input.seq,
                            payload: input.payload,
                            confirmed: true,
                        },
                    );
                }
            }
        }
    }

    // Rollback

    /// Rewinds to the snapshot preceding `target` and resimulates
    /// through the current local frame. Returns `false` (after logging)
    /// when no usable snapshot remains; the resulting divergence is
    /// left for hash consensus to catch.
    fn execute_rollback<W: World>(
        &mut self,
        world: &mut W,
        registry: &mut PeerRegistry,
        target: Frame,
        resync_out: &mut Vec<PeerKey>,
    ) -> Result<bool, PredictionError> {
        let head = self.local_frame;
        let wanted = target.saturating_sub(1);
        let (resume_from, bytes) = match self.ring.load_at_or_before(wanted) {
            Some(snapshot) => (snapshot.frame + 1, snapshot.bytes.clone()),
            None => {
                warn!("rollback to frame {target} aborted: no snapshot at or before {wanted}");
                return Ok(false);
            }
        };

        // Undo lifecycle side effects newest-first so the game layer can
        // reverse listeners that live outside the world snapshot.
        for frame in (resume_from..=head).rev() {
            let fired: Vec<LifecycleEvent> = self
                .history
                .lifecycle_events(frame)
                .iter()
                .filter(|entry| entry.fired)
                .map(|entry| entry.event.clone())
                .collect();
            if let Some(entries) = self.history.lifecycle_events_mut(frame) {
                for entry in entries.iter_mut() {
                    entry.fired = false;
                }
            }
            for event in fired.iter().rev() {
                registry.revert_lifecycle(event);
                if let Some(callback) = &mut self.on_undo_lifecycle_event {
                    callback(frame, event);
                }
            }
        }

        world.load_snapshot(&bytes)?;

        for frame in resume_from..=head {
            self.step(world, registry, frame, resync_out)?;
            if frame % self.snapshot_interval == 0 {
                self.ring.save(Snapshot {
                    frame,
                    hash: world.state_hash(),
                    bytes: world.snapshot(),
                });
            }
        }

        let depth = head - target + 1;
        self.stats.rollback_count += 1;
        self.stats.frames_resimulated += u64::from(head - resume_from + 1);
        self.stats.max_rollback_depth = self.stats.max_rollback_depth.max(depth);

        if let Some(callback) = &mut self.on_rollback {
            callback(head, target);
        }
        Ok(true)
    }

    // Resync support

    /// Refuses further advances while a snapshot is loading.
    pub fn pause(&mut self) {
        self.enabled = false;
    }

    pub fn resume(&mut self) {
        self.enabled = true;
    }

    /// Rebases all frame bookkeeping onto an adopted snapshot and drops
    /// state that predates it.
    pub fn adopt_snapshot_frame(&mut self, frame: Frame) {
        self.local_frame = frame;
        self.confirmed_frame = frame;
        self.history.clear();
        self.ring.clear();
    }

    /// Restores construction state. Callback slots are kept; they
    /// belong to the collaborator.
    pub fn reset(&mut self) {
        self.local_frame = 0;
        self.confirmed_frame = 0;
        self.enabled = true;
        self.local_seq = 0;
        self.history.clear();
        self.ring.clear();
        self.stats = PredictionStats::default();
    }
}
