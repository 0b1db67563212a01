//! Domain-level devices built on top of requested lines.
//!
//! Every device owns its [`LineHandle`](crate::registry::LineHandle)s for its
//! whole lifetime, so dropping a device releases its lines on every exit path.

mod binary_sensor;
mod cover;
mod switch;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

pub use binary_sensor::{BinarySensor, BinarySensorOptions};
pub use cover::{Cover, CoverCommand, CoverOptions};
pub use switch::{Switch, SwitchOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityState {
    BinarySensor { is_on: Option<bool> },
    Switch { is_on: bool },
    Cover { is_closed: bool },
}

#[derive(Debug, Clone, Serialize)]
pub struct StateUpdate {
    pub entity_id: String,
    pub state: EntityState,
    /// Set when the state was just re-read from hardware.
    pub force_refresh: bool,
    pub timestamp_ms: u64,
}

impl StateUpdate {
    pub fn new(entity_id: &str, state: EntityState, force_refresh: bool) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            state,
            force_refresh,
            timestamp_ms: epoch_millis(),
        }
    }
}

/// Sink for device state changes, implemented by the host.
pub trait StateNotifier: Send + Sync {
    fn notify(&self, update: StateUpdate);
}

/// Identity shared by all devices.
#[derive(Debug, Clone)]
pub struct EntityInfo {
    pub id: String,
    pub name: String,
}

impl EntityInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
