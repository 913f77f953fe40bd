//! Behavioral tests for the engine surface: suspension, reset,
//! per-frame outbound traffic, and stats plumbing.

use std::cell::RefCell;
use std::rc::Rc;

use meshsync::{
    hash_u32, xxhash32, AppliedInput, EngineError, Frame, NullObserver, SyncConfig, SyncEngine,
    SyncEvent, SyncMessage, SyncObserver, World, WorldError,
};

/// Minimal deterministic world: a running hash folded from frames and
/// inputs.
struct HashWorld {
    state: u32,
    fail_ticks: bool,
}

impl HashWorld {
    fn new() -> Self {
        Self {
            state: 1,
            fail_ticks: false,
        }
    }
}

impl World for HashWorld {
    fn tick(&mut self, frame: Frame, inputs: &[AppliedInput]) -> Result<(), WorldError> {
        if self.fail_ticks {
            return Err(WorldError::TickFailed {
                frame,
                detail: "induced".to_string(),
            });
        }
        self.state = hash_u32(self.state, frame);
        for input in inputs {
            self.state = xxhash32(&input.data, self.state);
        }
        Ok(())
    }

    fn snapshot(&mut self) -> Vec<u8> {
        self.state.to_le_bytes().to_vec()
    }

    fn load_snapshot(&mut self, bytes: &[u8]) -> Result<(), WorldError> {
        let array: [u8; 4] = bytes.try_into().map_err(|_| WorldError::BadSnapshot {
            detail: "expected 4 bytes".to_string(),
        })?;
        self.state = u32::from_le_bytes(array);
        Ok(())
    }

    fn state_hash(&self) -> u32 {
        self.state
    }

    fn entity_count(&self) -> u32 {
        0
    }

    fn partition_delta(&self, _partition: u16, _num_partitions: u16) -> Vec<u8> {
        Vec::new()
    }

    fn apply_partition_delta(&mut self, _partition: u16, _bytes: &[u8]) -> Result<(), WorldError> {
        Ok(())
    }
}

struct Recorder {
    events: Rc<RefCell<Vec<SyncEvent>>>,
}

impl SyncObserver for Recorder {
    fn notify(&mut self, event: &SyncEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

#[test]
fn advance_simulates_and_broadcasts_hashes() {
    let mut engine = SyncEngine::new(SyncConfig::default(), "peer-a", Box::new(NullObserver));
    let mut world = HashWorld::new();

    let report = engine.advance(&mut world, 0).unwrap();
    assert!(report.advanced);
    assert_eq!(report.frame, 1);

    let outgoing = engine.take_outgoing();
    let hashes: Vec<_> = outgoing
        .iter()
        .filter(|o| matches!(o.message, SyncMessage::Hash { .. }))
        .collect();
    assert_eq!(hashes.len(), 1);
    match &hashes[0].message {
        SyncMessage::Hash { frame, hash } => {
            assert_eq!(*frame, 1);
            assert_eq!(*hash, world.state_hash());
        }
        _ => unreachable!(),
    }
}

#[test]
fn advance_halts_at_prediction_horizon() {
    let mut engine = SyncEngine::new(SyncConfig::default(), "peer-a", Box::new(NullObserver));
    let mut world = HashWorld::new();
    for _ in 0..15 {
        engine.advance(&mut world, 0).unwrap();
    }
    let stats = engine.stats();
    assert_eq!(stats.local_frame, 10);
    assert_eq!(stats.prediction_depth, 10);
}

#[test]
fn fatal_world_error_suspends_until_reset() {
    let events: Rc<RefCell<Vec<SyncEvent>>> = Rc::default();
    let recorder = Recorder {
        events: events.clone(),
    };
    let mut engine = SyncEngine::new(SyncConfig::default(), "peer-a", Box::new(recorder));
    let mut world = HashWorld::new();

    world.fail_ticks = true;
    assert!(matches!(
        engine.advance(&mut world, 0),
        Err(EngineError::Suspended)
    ));
    assert!(engine.is_suspended());
    assert!(events
        .borrow()
        .iter()
        .any(|e| matches!(e, SyncEvent::Fatal { .. })));

    // Suspended engines refuse to advance.
    assert!(matches!(
        engine.advance(&mut world, 50),
        Err(EngineError::Suspended)
    ));

    world.fail_ticks = false;
    engine.reset();
    assert!(!engine.is_suspended());
    let report = engine.advance(&mut world, 100).unwrap();
    assert!(report.advanced);
    assert_eq!(report.frame, 1);
}

#[test]
fn reset_clears_stats_and_queues() {
    let mut engine = SyncEngine::new(SyncConfig::default(), "peer-a", Box::new(NullObserver));
    let mut world = HashWorld::new();
    engine.queue_local_input(b"x".to_vec());
    for _ in 0..5 {
        engine.advance(&mut world, 0).unwrap();
    }
    assert!(!engine.take_outgoing().is_empty());

    engine.reset();
    let stats = engine.stats();
    assert_eq!(stats.local_frame, 0);
    assert_eq!(stats.confirmed_frame, 0);
    assert_eq!(stats.messages_sent, 0);
    assert_eq!(stats.active_peer_count, 1);
    assert!(engine.take_outgoing().is_empty());
}

#[test]
fn unsolicited_snapshot_is_ignored() {
    let mut engine = SyncEngine::new(SyncConfig::default(), "peer-a", Box::new(NullObserver));
    let mut world = HashWorld::new();
    for _ in 0..3 {
        engine.advance(&mut world, 0).unwrap();
    }
    let state_before = world.state_hash();
    let frame_before = engine.stats().local_frame;

    engine
        .inbound_sender()
        .send(
            "peer-z",
            SyncMessage::Snapshot {
                frame: 99,
                hash: 0xDEAD,
                bytes: 7u32.to_le_bytes().to_vec(),
            },
        )
        .unwrap();
    engine.advance(&mut world, 0).unwrap();

    assert_ne!(world.state_hash(), 7);
    assert_eq!(engine.stats().local_frame, frame_before + 1);
    // The state advanced normally rather than being replaced.
    assert_ne!(world.state_hash(), state_before);
}

#[test]
fn ping_cadence_follows_interval_once_peers_exist() {
    let mut config = SyncConfig::default();
    config.ping_interval_ms = 100;
    let mut engine = SyncEngine::new(config, "peer-a", Box::new(NullObserver));
    let mut world = HashWorld::new();

    // Alone: no pings.
    engine.advance(&mut world, 0).unwrap();
    assert!(engine
        .take_outgoing()
        .iter()
        .all(|o| !matches!(o.message, SyncMessage::Ping { .. })));

    engine
        .inbound_sender()
        .send("peer-b", SyncMessage::Join { peer: "peer-b".to_string() })
        .unwrap();
    engine.advance(&mut world, 10).unwrap();
    let pings = |outgoing: &[meshsync::Outbound]| {
        outgoing
            .iter()
            .filter(|o| matches!(o.message, SyncMessage::Ping { .. }))
            .count()
    };
    assert_eq!(pings(&engine.take_outgoing()), 1);

    // Within the interval: quiet. Past it: one more.
    engine.advance(&mut world, 50).unwrap();
    assert_eq!(pings(&engine.take_outgoing()), 0);
    engine.advance(&mut world, 120).unwrap();
    assert_eq!(pings(&engine.take_outgoing()), 1);
}

#[test]
fn snapshot_populated_peer_join_is_suppressed_once() {
    let mut engine = SyncEngine::new(SyncConfig::default(), "peer-b", Box::new(NullObserver));
    let mut world = HashWorld::new();
    let fired: Rc<RefCell<Vec<(Frame, String)>>> = Rc::default();
    let fired_clone = fired.clone();
    engine
        .prediction_mut()
        .set_on_lifecycle_event(Box::new(move |frame, event| {
            fired_clone.borrow_mut().push((frame, event.peer.clone()));
        }));
    let sender = engine.inbound_sender();

    sender
        .send("peer-a", SyncMessage::Join { peer: "peer-a".to_string() })
        .unwrap();
    engine.advance(&mut world, 0).unwrap();
    engine.advance(&mut world, 0).unwrap();
    let hash_at_2 = world.state_hash();
    engine.advance(&mut world, 0).unwrap();

    // A relay-declared majority hash disagreeing with frame 2 marks the
    // local peer desynced and starts a resync toward peer-a.
    sender
        .send(
            "peer-a",
            SyncMessage::Tick {
                frame: 2,
                inputs: vec![],
                majority_hash: Some(hash_at_2 ^ 1),
            },
        )
        .unwrap();
    engine.advance(&mut world, 0).unwrap();
    assert!(engine.stats().resync_pending);

    // The authoritative snapshot carries peer-a's entities with it.
    sender
        .send(
            "peer-a",
            SyncMessage::Snapshot {
                frame: 20,
                hash: 7,
                bytes: 7u32.to_le_bytes().to_vec(),
            },
        )
        .unwrap();
    engine.advance(&mut world, 0).unwrap();
    assert!(!engine.stats().resync_pending);
    fired.borrow_mut().clear();

    // peer-a came in with the snapshot: its re-announced join must not
    // fire connect effects again.
    sender
        .send("peer-a", SyncMessage::Join { peer: "peer-a".to_string() })
        .unwrap();
    engine.advance(&mut world, 0).unwrap();
    assert!(fired.borrow().is_empty());

    // A peer the snapshot did not carry joins normally.
    sender
        .send("peer-c", SyncMessage::Join { peer: "peer-c".to_string() })
        .unwrap();
    engine.advance(&mut world, 0).unwrap();
    assert_eq!(fired.borrow().len(), 1);
    assert_eq!(fired.borrow()[0].1, "peer-c");

    // The guard is consumed: a later join for peer-a fires again.
    sender
        .send("peer-a", SyncMessage::Join { peer: "peer-a".to_string() })
        .unwrap();
    engine.advance(&mut world, 0).unwrap();
    assert_eq!(fired.borrow().len(), 2);
    assert_eq!(fired.borrow()[1].1, "peer-a");
}

#[test]
fn join_and_leave_messages_change_membership_on_the_next_frame() {
    let mut engine = SyncEngine::new(SyncConfig::default(), "peer-a", Box::new(NullObserver));
    let mut world = HashWorld::new();

    engine
        .inbound_sender()
        .send("peer-b", SyncMessage::Join { peer: "peer-b".to_string() })
        .unwrap();
    engine.advance(&mut world, 0).unwrap();
    assert_eq!(engine.stats().active_peer_count, 2);

    engine
        .inbound_sender()
        .send("peer-b", SyncMessage::Leave { peer: "peer-b".to_string() })
        .unwrap();
    engine.advance(&mut world, 50).unwrap();
    assert_eq!(engine.stats().active_peer_count, 1);

    // A leave for a never-seen peer is ignored.
    engine
        .inbound_sender()
        .send("peer-z", SyncMessage::Leave { peer: "peer-q".to_string() })
        .unwrap();
    engine.advance(&mut world, 100).unwrap();
    assert_eq!(engine.stats().active_peer_count, 1);
}

#[test]
fn pong_replies_echo_the_send_stamp() {
    let mut engine = SyncEngine::new(SyncConfig::default(), "peer-a", Box::new(NullObserver));
    let mut world = HashWorld::new();
    engine
        .inbound_sender()
        .send("peer-b", SyncMessage::Ping { t_send: 777 })
        .unwrap();
    engine.advance(&mut world, 900).unwrap();
    let outgoing = engine.take_outgoing();
    let pong = outgoing
        .iter()
        .find(|o| matches!(o.message, SyncMessage::Pong { .. }))
        .expect("pong reply");
    match &pong.message {
        SyncMessage::Pong { t_send, t_server } => {
            assert_eq!(*t_send, 777);
            assert_eq!(*t_server, 900);
        }
        _ => unreachable!(),
    }
    match &pong.recipient {
        meshsync::Recipient::To(id) => assert_eq!(id, "peer-b"),
        other => panic!("unexpected recipient {other:?}"),
    }
}
