#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use gpiohub::{LineId, LineRegistry, MockGpioBackend, StateNotifier, StateUpdate};

pub const CHIP: &str = "/dev/gpiochip0";

#[derive(Default)]
pub struct RecordingNotifier {
    updates: Mutex<Vec<StateUpdate>>,
}

impl RecordingNotifier {
    pub fn updates(&self) -> Vec<StateUpdate> {
        self.updates.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.updates.lock().len()
    }
}

impl StateNotifier for RecordingNotifier {
    fn notify(&self, update: StateUpdate) {
        self.updates.lock().push(update);
    }
}

pub fn line(offset: u32) -> LineId {
    LineId::new(CHIP, offset)
}

pub fn registry() -> (MockGpioBackend, Arc<LineRegistry<MockGpioBackend>>) {
    let backend = MockGpioBackend::new().with_chip(CHIP, 32);
    let registry = Arc::new(LineRegistry::new(Arc::new(backend.clone())));
    (backend, registry)
}
