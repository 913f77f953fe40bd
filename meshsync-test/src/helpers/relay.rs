//! Authoritative input-ordering relay for end-to-end tests.
//!
//! Plays the role of the out-of-scope input plugin: it emits one tick
//! message per frame carrying a complete confirmed input set (an
//! explicit empty input for every client with nothing scheduled), and
//! runs a shadow copy of the simulation over exactly those inputs. The
//! shadow's state hash is the ground truth a test compares peers
//! against once their predictions have been confirmed.
//!
//! Ticks are produced after the peers have simulated the frame, so
//! every confirmation re-validates the predictions made for it, the
//! way a live relay trails the predicting clients.

use std::collections::BTreeMap;

use meshsync::{AppliedInput, Frame, InputPayload, PeerInterner, SyncMessage, TickInput, World};

use super::mock_world::MockWorld;

pub struct Relay {
    clients: Vec<String>,
    scheduled: BTreeMap<Frame, BTreeMap<String, Vec<u8>>>,
    shadow: MockWorld,
    shadow_frame: Frame,
    seq: u32,
    interner: PeerInterner,
}

impl Relay {
    pub fn new(clients: &[&str]) -> Self {
        let mut sorted: Vec<String> = clients.iter().map(|c| c.to_string()).collect();
        sorted.sort();
        let mut interner = PeerInterner::new();
        for client in &sorted {
            interner.intern(client);
        }
        Self {
            clients: sorted,
            scheduled: BTreeMap::new(),
            shadow: MockWorld::new(),
            shadow_frame: 0,
            seq: 0,
            interner,
        }
    }

    /// Schedules a confirmed input for `client` at `frame`.
    pub fn schedule(&mut self, frame: Frame, client: &str, data: Vec<u8>) {
        self.scheduled
            .entry(frame)
            .or_default()
            .insert(client.to_string(), data);
    }

    /// Produces the authoritative tick for the next frame, advancing
    /// the shadow simulation over the same inputs.
    pub fn tick_for(&mut self, frame: Frame) -> SyncMessage {
        assert_eq!(
            frame,
            self.shadow_frame + 1,
            "relay ticks must be sequential"
        );
        let scheduled = self.scheduled.remove(&frame).unwrap_or_default();

        let mut inputs = Vec::with_capacity(self.clients.len());
        let mut applied = Vec::with_capacity(self.clients.len());
        for client in &self.clients {
            let data = scheduled.get(client).cloned().unwrap_or_default();
            self.seq += 1;
            inputs.push(TickInput {
                seq: self.seq,
                client: client.clone(),
                payload: InputPayload::Game(data.clone()),
            });
            applied.push(AppliedInput {
                peer: self.interner.get(client).expect("client was interned"),
                data,
            });
        }

        self.shadow
            .tick(frame, &applied)
            .expect("shadow world cannot fail");
        self.shadow_frame = frame;

        SyncMessage::Tick {
            frame,
            inputs,
            majority_hash: None,
        }
    }

    pub fn shadow(&self) -> &MockWorld {
        &self.shadow
    }

    pub fn shadow_hash(&self) -> u32 {
        self.shadow.state_hash()
    }

    pub fn shadow_frame(&self) -> Frame {
        self.shadow_frame
    }
}
