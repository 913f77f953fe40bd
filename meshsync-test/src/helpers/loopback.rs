//! An in-memory message switch connecting engine inbound queues.

use std::collections::BTreeMap;

use meshsync::{InboundSender, Outbound, Recipient, SyncMessage};

/// Routes outbound messages between registered peers. Broadcasts go to
/// every peer except the sender; targeted messages go to their
/// recipient. Unknown recipients are dropped, like a lossy transport.
#[derive(Default)]
pub struct Loopback {
    routes: BTreeMap<String, InboundSender>,
}

impl Loopback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: &str, sender: InboundSender) {
        self.routes.insert(id.to_string(), sender);
    }

    /// Delivers a single message from `from` to `to`.
    pub fn send(&self, from: &str, to: &str, message: SyncMessage) {
        if let Some(sender) = self.routes.get(to) {
            let _ = sender.send(from, message);
        }
    }

    /// Delivers a message from `from` to every registered peer,
    /// including `from` itself when `to_self` is set.
    pub fn send_all(&self, from: &str, message: SyncMessage, to_self: bool) {
        for (id, sender) in &self.routes {
            if !to_self && id == from {
                continue;
            }
            let _ = sender.send(from, message.clone());
        }
    }

    /// Routes one engine-produced outbound message.
    pub fn route(&self, from: &str, outbound: Outbound) {
        match outbound.recipient {
            Recipient::Broadcast => self.send_all(from, outbound.message, false),
            Recipient::To(to) => self.send(from, &to, outbound.message),
        }
    }

    /// Routes a whole drained outbound batch.
    pub fn route_all(&self, from: &str, batch: Vec<Outbound>) {
        for outbound in batch {
            self.route(from, outbound);
        }
    }
}
