//! Observer that records every event for later assertions.

use std::cell::RefCell;
use std::rc::Rc;

use meshsync::{SyncEvent, SyncObserver};

#[derive(Default)]
pub struct RecordingObserver {
    events: Rc<RefCell<Vec<SyncEvent>>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A shared handle to the recorded events; clone before handing the
    /// observer to an engine.
    pub fn handle(&self) -> Rc<RefCell<Vec<SyncEvent>>> {
        self.events.clone()
    }
}

impl SyncObserver for RecordingObserver {
    fn notify(&mut self, event: &SyncEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}
