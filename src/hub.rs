use log::{info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::{AppConfig, BinarySensorConfig, EntityConfig};
use crate::devices::{
    BinarySensor, BinarySensorOptions, Cover, CoverOptions, EntityInfo, EntityState,
    StateNotifier, StateUpdate, Switch, SwitchOptions,
};
use crate::error::AppError;
use crate::gpio::{GpioBackend, LineId};
use crate::registry::{AcquireMode, LineRegistry};

/// Notification sink: broadcasts every update and keeps a bounded history per entity.
pub struct StateEventHandler {
    event_tx: broadcast::Sender<StateUpdate>,
    event_history: RwLock<FxHashMap<String, VecDeque<StateUpdate>>>,
    event_history_capacity: usize,
}

impl StateEventHandler {
    pub fn new(event_tx: broadcast::Sender<StateUpdate>, event_history_capacity: usize) -> Self {
        Self {
            event_tx,
            event_history: RwLock::new(FxHashMap::default()),
            event_history_capacity,
        }
    }

    pub fn dispatch(&self, event: StateUpdate) {
        {
            let mut history = self.event_history.write();
            let entries = history.entry(event.entity_id.clone()).or_default();
            while entries.len() >= self.event_history_capacity.max(1) {
                entries.pop_front();
            }
            entries.push_back(event.clone());
        }
        let _ = self.event_tx.send(event);
    }

    fn history(&self, entity_id: &str, limit: Option<usize>) -> Vec<StateUpdate> {
        self.event_history
            .read()
            .get(entity_id)
            .map(|d| {
                let events: Vec<StateUpdate> = if let Some(lim) = limit {
                    d.iter().rev().take(lim).cloned().collect()
                } else {
                    d.iter().rev().cloned().collect()
                };
                events.into_iter().rev().collect()
            })
            .unwrap_or_default()
    }

    fn forget(&self, entity_id: &str) {
        self.event_history.write().remove(entity_id);
    }
}

impl StateNotifier for StateEventHandler {
    fn notify(&self, update: StateUpdate) {
        self.dispatch(update);
    }
}

pub enum Device<B: GpioBackend> {
    BinarySensor(Arc<Mutex<BinarySensor<B>>>),
    Switch(Arc<Mutex<Switch<B>>>),
    Cover(Arc<Mutex<Cover<B>>>),
}

impl<B: GpioBackend> Clone for Device<B> {
    fn clone(&self) -> Self {
        match self {
            Device::BinarySensor(d) => Device::BinarySensor(Arc::clone(d)),
            Device::Switch(d) => Device::Switch(Arc::clone(d)),
            Device::Cover(d) => Device::Cover(Arc::clone(d)),
        }
    }
}

impl<B: GpioBackend> Device<B> {
    pub fn describe(&self) -> EntityDescriptor {
        match self {
            Device::BinarySensor(d) => {
                let d = d.lock();
                EntityDescriptor::new(d.info(), d.state(), d.lines())
            }
            Device::Switch(d) => {
                let d = d.lock();
                EntityDescriptor::new(d.info(), d.state(), d.lines())
            }
            Device::Cover(d) => {
                let d = d.lock();
                EntityDescriptor::new(d.info(), d.state(), d.lines())
            }
        }
    }

    fn lines(&self) -> Vec<LineId> {
        match self {
            Device::BinarySensor(d) => d.lock().lines(),
            Device::Switch(d) => d.lock().lines(),
            Device::Cover(d) => d.lock().lines(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityDescriptor {
    pub id: String,
    pub name: String,
    pub state: EntityState,
    pub lines: Vec<LineId>,
}

impl EntityDescriptor {
    fn new(info: &EntityInfo, state: EntityState, lines: Vec<LineId>) -> Self {
        Self {
            id: info.id.clone(),
            name: info.name.clone(),
            state,
            lines,
        }
    }
}

struct Registered<B: GpioBackend> {
    device: Device<B>,
    poller: Option<JoinHandle<()>>,
}

impl<B: GpioBackend> Drop for Registered<B> {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }
}

#[derive(Debug, Default)]
pub struct SetupReport {
    pub created: Vec<String>,
    pub failed: Vec<(String, AppError)>,
}

/// Host side of the devices: builds them from config, schedules their polling
/// and routes commands to them.
pub struct DeviceHub<B: GpioBackend> {
    config: RwLock<Arc<AppConfig>>,
    registry: Arc<LineRegistry<B>>,
    events: Arc<StateEventHandler>,
    entities: RwLock<FxHashMap<String, Registered<B>>>,
}

impl<B: GpioBackend> DeviceHub<B> {
    pub fn new(config: Arc<AppConfig>, registry: Arc<LineRegistry<B>>) -> Self {
        let (event_tx, _) = broadcast::channel(config.broadcast_capacity);
        let events = Arc::new(StateEventHandler::new(
            event_tx,
            config.event_history_capacity,
        ));

        Self {
            config: RwLock::new(config),
            registry,
            events,
            entities: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.config.read().clone()
    }

    /// Builds every configured entity and starts polling. Must run inside a
    /// tokio runtime. An entity that fails to set up is skipped and reported.
    pub fn start(&self) -> Result<SetupReport, AppError> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| AppError::InvalidState(format!("hub needs a tokio runtime: {e}")))?;

        let config = self.config();
        let mode = if config.shared_lines {
            AcquireMode::Shared
        } else {
            AcquireMode::Exclusive
        };
        let mut report = SetupReport::default();
        let mut entities = Vec::new();

        for cfg in &config.binary_sensors {
            let id = cfg.entity_id().to_string();
            match self.setup_binary_sensor(&id, cfg, &config, mode) {
                Ok(registered) => entities.push((id, registered)),
                Err(e) => report.failed.push((id, e)),
            }
        }
        for cfg in &config.switches {
            let id = cfg.entity_id().to_string();
            let options = SwitchOptions::from_config(cfg, &config.default_device, mode);
            let info = EntityInfo::new(id.as_str(), cfg.name.as_str());
            match Switch::new(&self.registry, info, &options, self.events.clone()) {
                Ok(switch) => entities.push((
                    id,
                    Registered {
                        device: Device::Switch(Arc::new(Mutex::new(switch))),
                        poller: None,
                    },
                )),
                Err(e) => report.failed.push((id, e)),
            }
        }
        for cfg in &config.covers {
            let id = cfg.entity_id().to_string();
            let options = CoverOptions::from_config(cfg, &config.default_device, mode);
            let info = EntityInfo::new(id.as_str(), cfg.name.as_str());
            match Cover::new(&self.registry, info, &options, self.events.clone()) {
                Ok(cover) => {
                    let cover = Arc::new(Mutex::new(cover));
                    let poller = spawn_cover_scanner(
                        id.clone(),
                        Arc::downgrade(&cover),
                        Duration::from_secs(config.scan_interval),
                    );
                    entities.push((
                        id,
                        Registered {
                            device: Device::Cover(cover),
                            poller: Some(poller),
                        },
                    ));
                }
                Err(e) => report.failed.push((id, e)),
            }
        }

        for (id, e) in &report.failed {
            warn!("setup of {id} failed: {e}");
        }

        let mut map = self.entities.write();
        for (id, registered) in entities {
            info!("entity {id} ready");
            report.created.push(id.clone());
            map.insert(id, registered);
        }
        Ok(report)
    }

    fn setup_binary_sensor(
        &self,
        id: &str,
        cfg: &BinarySensorConfig,
        config: &AppConfig,
        mode: AcquireMode,
    ) -> Result<Registered<B>, AppError> {
        let options = BinarySensorOptions::from_config(cfg, &config.default_device, mode)?;
        let info = EntityInfo::new(id, cfg.name.as_str());
        let mut sensor = BinarySensor::new(&self.registry, info, &options, self.events.clone())?;
        if let Err(e) = sensor.update() {
            warn!("initial read of {id} failed, state unknown: {e}");
        }

        let interval = sensor.poll_interval();
        let sensor = Arc::new(Mutex::new(sensor));
        let poller = spawn_sensor_poller(id.to_string(), Arc::downgrade(&sensor), interval);

        Ok(Registered {
            device: Device::BinarySensor(sensor),
            poller: Some(poller),
        })
    }

    /// Stops polling, drops every entity and drains the registry.
    pub fn shutdown(&self) {
        self.teardown();
        self.registry.shutdown();
        info!("hub stopped");
    }

    /// Rebuilds all entities from a new configuration.
    pub fn reload(&self, config: AppConfig) -> Result<SetupReport, AppError> {
        config.validate()?;
        self.teardown();
        *self.config.write() = Arc::new(config);
        info!("configuration reloaded");
        self.start()
    }

    fn teardown(&self) {
        let drained: Vec<_> = self.entities.write().drain().collect();
        for (id, registered) in drained {
            let lines = registered.device.lines();
            drop(registered);
            // a poll cycle in flight may still hold the device
            for line in &lines {
                self.registry.release(line);
            }
            self.events.forget(&id);
            info!("entity {id} removed");
        }
    }

    fn device(&self, entity_id: &str) -> Result<Device<B>, AppError> {
        self.entities
            .read()
            .get(entity_id)
            .map(|r| r.device.clone())
            .ok_or_else(|| AppError::NotFound(entity_id.to_string()))
    }

    fn switch(&self, entity_id: &str) -> Result<Arc<Mutex<Switch<B>>>, AppError> {
        match self.device(entity_id)? {
            Device::Switch(s) => Ok(s),
            _ => Err(AppError::InvalidState(format!("{entity_id} is not a switch"))),
        }
    }

    fn cover(&self, entity_id: &str) -> Result<Arc<Mutex<Cover<B>>>, AppError> {
        match self.device(entity_id)? {
            Device::Cover(c) => Ok(c),
            _ => Err(AppError::InvalidState(format!("{entity_id} is not a cover"))),
        }
    }

    pub async fn list_entities(&self) -> FxHashMap<String, EntityDescriptor> {
        let devices: Vec<(String, Device<B>)> = self
            .entities
            .read()
            .iter()
            .map(|(id, r)| (id.clone(), r.device.clone()))
            .collect();
        devices
            .into_iter()
            .map(|(id, d)| (id, d.describe()))
            .collect()
    }

    pub async fn get_entity(&self, entity_id: &str) -> Result<EntityDescriptor, AppError> {
        Ok(self.device(entity_id)?.describe())
    }

    pub async fn turn_on(&self, entity_id: &str) -> Result<EntityState, AppError> {
        let switch = self.switch(entity_id)?;
        let mut switch = switch.lock();
        switch.turn_on()?;
        Ok(switch.state())
    }

    pub async fn turn_off(&self, entity_id: &str) -> Result<EntityState, AppError> {
        let switch = self.switch(entity_id)?;
        let mut switch = switch.lock();
        switch.turn_off()?;
        Ok(switch.state())
    }

    pub async fn open_cover(&self, entity_id: &str) -> Result<EntityState, AppError> {
        let cover = self.cover(entity_id)?;
        run_blocking(move || {
            let mut cover = cover.lock();
            cover.open_cover()?;
            Ok(cover.state())
        })
        .await
    }

    pub async fn close_cover(&self, entity_id: &str) -> Result<EntityState, AppError> {
        let cover = self.cover(entity_id)?;
        run_blocking(move || {
            let mut cover = cover.lock();
            cover.close_cover()?;
            Ok(cover.state())
        })
        .await
    }

    /// Forces a re-read of a sensor or cover.
    pub async fn update_entity(&self, entity_id: &str) -> Result<EntityState, AppError> {
        match self.device(entity_id)? {
            Device::BinarySensor(s) => {
                let mut sensor = s.lock();
                sensor.update()?;
                Ok(sensor.state())
            }
            Device::Switch(s) => Ok(s.lock().state()),
            Device::Cover(c) => {
                run_blocking(move || {
                    let mut cover = c.lock();
                    cover.update()?;
                    Ok(cover.state())
                })
                .await
            }
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StateUpdate> {
        self.events.event_tx.subscribe()
    }

    pub async fn get_events(
        &self,
        entity_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StateUpdate>, AppError> {
        self.device(entity_id)?;
        Ok(self.events.history(entity_id, limit))
    }

    pub async fn get_last_event(&self, entity_id: &str) -> Result<Option<StateUpdate>, AppError> {
        self.device(entity_id)?;
        Ok(self.events.history(entity_id, Some(1)).pop())
    }
}

// line I/O and relay holds block, keep them off the async workers
async fn run_blocking<T, F>(f: F) -> Result<T, AppError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Gpio(format!("blocking worker failed: {e}")))?
}

fn spawn_sensor_poller<B: GpioBackend>(
    id: String,
    sensor: Weak<Mutex<BinarySensor<B>>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let Some(strong) = sensor.upgrade() else {
                break;
            };
            let result = strong.lock().poll();
            if let Err(e) = result {
                warn!("poll of {id} failed: {e}");
            }
        }
    })
}

fn spawn_cover_scanner<B: GpioBackend>(
    id: String,
    cover: Weak<Mutex<Cover<B>>>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the state line was read at construction
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(strong) = cover.upgrade() else {
                break;
            };
            let result = run_blocking(move || {
                let mut cover = strong.lock();
                cover.update()
            })
            .await;
            if let Err(e) = result {
                warn!("scan of {id} failed: {e}");
            }
        }
    })
}
