//! Lock-protected inbound message queue.
//!
//! The transport task may run on its own thread; it appends to the
//! queue through a cloned [`InboundSender`], and the simulation task
//! drains everything at a fixed point at the top of each tick. Nothing
//! simulation-affecting is touched mid-tick.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::messages::SyncMessage;

/// Error returned when the queue's lock has been poisoned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("inbound message queue is no longer usable")]
pub struct SendError;

/// A message received from the transport, tagged with the sender's
/// canonical string id.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub from: String,
    pub message: SyncMessage,
}

type Shared = Arc<Mutex<VecDeque<InboundMessage>>>;

/// Creates a connected sender/receiver pair.
pub fn channel() -> (InboundSender, InboundReceiver) {
    let shared: Shared = Arc::new(Mutex::new(VecDeque::new()));
    (
        InboundSender {
            shared: shared.clone(),
        },
        InboundReceiver { shared },
    )
}

/// Transport-side handle. Cheap to clone; safe to use from any thread.
#[derive(Clone)]
pub struct InboundSender {
    shared: Shared,
}

impl InboundSender {
    pub fn send(&self, from: &str, message: SyncMessage) -> Result<(), SendError> {
        let mut queue = self.shared.lock().map_err(|_| SendError)?;
        queue.push_back(InboundMessage {
            from: from.to_string(),
            message,
        });
        Ok(())
    }
}

/// Simulation-side handle.
pub struct InboundReceiver {
    shared: Shared,
}

impl InboundReceiver {
    /// Takes every queued message in arrival order.
    pub fn drain(&self) -> Vec<InboundMessage> {
        match self.shared.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut queue) = self.shared.lock() {
            queue.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_drain_in_arrival_order() {
        let (sender, receiver) = channel();
        sender.send("a", SyncMessage::Ping { t_send: 1 }).unwrap();
        sender.send("b", SyncMessage::Ping { t_send: 2 }).unwrap();
        let drained = receiver.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].from, "a");
        assert_eq!(drained[1].from, "b");
        assert!(receiver.drain().is_empty());
    }

    #[test]
    fn sender_clones_share_the_queue() {
        let (sender, receiver) = channel();
        let clone = sender.clone();
        clone.send("a", SyncMessage::Ping { t_send: 1 }).unwrap();
        sender.send("a", SyncMessage::Ping { t_send: 2 }).unwrap();
        assert_eq!(receiver.drain().len(), 2);
    }
}
