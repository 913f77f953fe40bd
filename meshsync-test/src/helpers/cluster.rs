//! A driver wiring several engines, their worlds, the loopback switch,
//! and the input relay into one steppable fixture.

use std::cell::RefCell;
use std::rc::Rc;

use meshsync::{Frame, Outbound, SyncConfig, SyncEngine, SyncEvent, SyncMessage};

use super::loopback::Loopback;
use super::mock_world::MockWorld;
use super::recorder::RecordingObserver;
use super::relay::Relay;

/// Milliseconds of simulated wall clock per step (20 Hz tick rate).
pub const STEP_MS: u64 = 50;

type DropFilter = Box<dyn Fn(&str, &Outbound) -> bool>;

pub struct Cluster {
    pub ids: Vec<String>,
    pub engines: Vec<SyncEngine>,
    pub worlds: Vec<MockWorld>,
    pub events: Vec<Rc<RefCell<Vec<SyncEvent>>>>,
    pub loopback: Loopback,
    pub relay: Relay,
    pub now_ms: u64,
    pub frame: Frame,
    drop_filter: Option<DropFilter>,
}

impl Cluster {
    /// Builds engines for `ids`, registers them on the loopback, and
    /// delivers the bootstrap joins so everyone activates everyone at
    /// frame 1.
    pub fn new(ids: &[&str], config: SyncConfig) -> Self {
        let mut loopback = Loopback::new();
        let mut engines = Vec::new();
        let mut worlds = Vec::new();
        let mut events = Vec::new();

        for id in ids {
            let recorder = RecordingObserver::new();
            events.push(recorder.handle());
            let engine = SyncEngine::new(config.clone(), id, Box::new(recorder));
            loopback.register(id, engine.inbound_sender());
            engines.push(engine);
            worlds.push(MockWorld::new());
        }

        for joining in ids {
            loopback.send_all(
                joining,
                SyncMessage::Join {
                    peer: joining.to_string(),
                },
                false,
            );
        }

        Self {
            ids: ids.iter().map(|id| id.to_string()).collect(),
            engines,
            worlds,
            events,
            loopback,
            relay: Relay::new(ids),
            now_ms: 0,
            frame: 0,
            drop_filter: None,
        }
    }

    /// Installs a predicate that drops matching outbound messages,
    /// simulating a lossy link.
    pub fn set_drop_filter(&mut self, filter: DropFilter) {
        self.drop_filter = Some(filter);
    }

    pub fn index_of(&self, id: &str) -> usize {
        self.ids
            .iter()
            .position(|candidate| candidate == id)
            .expect("unknown peer id")
    }

    /// One lockstep iteration: every engine advances (draining the
    /// previous step's traffic), then the relay confirms the frame they
    /// just simulated, then peer traffic is exchanged. Confirmations
    /// trail the simulated frame by one step, so each confirmed frame
    /// re-validates the predictions that were made for it.
    pub fn step(&mut self) {
        for index in 0..self.engines.len() {
            self.engines[index]
                .advance(&mut self.worlds[index], self.now_ms)
                .expect("engine advance failed");
        }

        self.frame += 1;
        let tick = self.relay.tick_for(self.frame);
        for id in &self.ids {
            self.loopback.send("relay", id, tick.clone());
        }

        for index in 0..self.engines.len() {
            let from = self.ids[index].clone();
            let batch = self.engines[index].take_outgoing();
            for outbound in batch {
                if let Some(filter) = &self.drop_filter {
                    if filter(&from, &outbound) {
                        continue;
                    }
                }
                self.loopback.route(&from, outbound);
            }
        }

        self.now_ms += STEP_MS;
    }

    pub fn run(&mut self, steps: u32) {
        for _ in 0..steps {
            self.step();
        }
    }

    pub fn events_for(&self, id: &str) -> Vec<SyncEvent> {
        self.events[self.index_of(id)].borrow().clone()
    }
}
