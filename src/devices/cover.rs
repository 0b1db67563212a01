use log::{debug, error, info};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::config::{CoverConfig, EntityConfig, PullMode};
use crate::debounce::logical_level;
use crate::error::AppError;
use crate::gpio::{GpioBackend, LineId, LineSettings};
use crate::registry::{AcquireMode, LineHandle, LineRegistry};

use super::{EntityInfo, EntityState, StateNotifier, StateUpdate};

#[derive(Debug, Clone)]
pub struct CoverOptions {
    pub state_line: LineId,
    pub relay_line: LineId,
    pub state_pull_mode: PullMode,
    pub relay_time: Duration,
    pub invert_state: bool,
    pub invert_relay: bool,
    pub mode: AcquireMode,
}

impl CoverOptions {
    pub fn from_config(cfg: &CoverConfig, default_device: &str, mode: AcquireMode) -> Self {
        let chip = cfg.resolve_device(default_device);
        Self {
            state_line: LineId::new(chip, cfg.state_pin),
            relay_line: LineId::new(chip, cfg.relay_pin),
            state_pull_mode: PullMode::from_config(&cfg.state_pull_mode),
            relay_time: Duration::from_millis(cfg.relay_time),
            invert_state: cfg.invert_state,
            invert_relay: cfg.invert_relay,
            mode,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverCommand {
    Open,
    Close,
}

/// Two-state cover toggled by a momentary relay.
///
/// The open/closed state comes only from the state line. The relay is
/// stateless: each trigger is one pulse from the idle level to the active level
/// and back.
pub struct Cover<B: GpioBackend> {
    info: EntityInfo,
    state_line: LineHandle<B>,
    relay_line: LineHandle<B>,
    relay_time: Duration,
    invert_state: bool,
    invert_relay: bool,
    raw_state: bool,
    // last pulse not yet confirmed by a state read
    pending: Option<CoverCommand>,
    notifier: Arc<dyn StateNotifier>,
}

impl<B: GpioBackend> Cover<B> {
    pub fn new(
        registry: &Arc<LineRegistry<B>>,
        info: EntityInfo,
        options: &CoverOptions,
        notifier: Arc<dyn StateNotifier>,
    ) -> Result<Self, AppError> {
        let state_line = registry.acquire(
            &options.state_line,
            &LineSettings::input(options.state_pull_mode),
            options.mode,
        )?;
        let relay_line =
            registry.acquire(&options.relay_line, &LineSettings::output(), options.mode)?;

        // the idle level is the opposite of the active level
        relay_line.write(!options.invert_relay)?;
        let raw_state = state_line.read()?;

        debug!(
            "cover {} state {} relay {} ({} ms)",
            info.id,
            options.state_line,
            options.relay_line,
            options.relay_time.as_millis()
        );

        Ok(Self {
            info,
            state_line,
            relay_line,
            relay_time: options.relay_time,
            invert_state: options.invert_state,
            invert_relay: options.invert_relay,
            raw_state,
            pending: None,
            notifier,
        })
    }

    pub fn info(&self) -> &EntityInfo {
        &self.info
    }

    pub fn lines(&self) -> Vec<LineId> {
        vec![self.state_line.id().clone(), self.relay_line.id().clone()]
    }

    pub fn is_closed(&self) -> bool {
        logical_level(self.raw_state, self.invert_state)
    }

    pub fn pending(&self) -> Option<CoverCommand> {
        self.pending
    }

    pub fn state(&self) -> EntityState {
        EntityState::Cover {
            is_closed: self.is_closed(),
        }
    }

    /// Re-reads the state line and clears any pending command.
    pub fn update(&mut self) -> Result<bool, AppError> {
        let raw = self.state_line.read()?;
        self.pending = None;
        if raw != self.raw_state {
            self.raw_state = raw;
            self.notifier
                .notify(StateUpdate::new(&self.info.id, self.state(), true));
        }
        Ok(self.is_closed())
    }

    /// Pulses the relay unless the cover already reports closed. Blocks for
    /// the relay time. Returns whether a pulse was sent.
    pub fn close_cover(&mut self) -> Result<bool, AppError> {
        if self.is_closed() || self.pending == Some(CoverCommand::Close) {
            debug!("{} already closed, not triggering", self.info.id);
            return Ok(false);
        }
        self.trigger(CoverCommand::Close)?;
        Ok(true)
    }

    /// Mirror of [`close_cover`](Self::close_cover).
    pub fn open_cover(&mut self) -> Result<bool, AppError> {
        if !self.is_closed() || self.pending == Some(CoverCommand::Open) {
            debug!("{} already open, not triggering", self.info.id);
            return Ok(false);
        }
        self.trigger(CoverCommand::Open)?;
        Ok(true)
    }

    fn trigger(&mut self, command: CoverCommand) -> Result<(), AppError> {
        info!("{} {command:?}: pulsing relay for {:?}", self.info.id, self.relay_time);
        let pulse = RelayPulse::start(&self.relay_line, self.invert_relay)?;
        thread::sleep(self.relay_time);
        pulse.finish()?;
        self.pending = Some(command);
        Ok(())
    }
}

/// Holds the relay at its active level. Going out of scope restores idle.
struct RelayPulse<'a, B: GpioBackend> {
    relay: &'a LineHandle<B>,
    idle: bool,
    armed: bool,
}

impl<'a, B: GpioBackend> RelayPulse<'a, B> {
    fn start(relay: &'a LineHandle<B>, invert_relay: bool) -> Result<Self, AppError> {
        let idle = !invert_relay;
        relay.write(!idle)?;
        Ok(Self {
            relay,
            idle,
            armed: true,
        })
    }

    /// Leaves the guard armed when the idle write fails, so drop retries it.
    fn finish(mut self) -> Result<(), AppError> {
        self.relay.write(self.idle)?;
        self.armed = false;
        Ok(())
    }
}

impl<B: GpioBackend> Drop for RelayPulse<'_, B> {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = self.relay.write(self.idle)
        {
            error!("failed to restore relay {} to idle: {e}", self.relay.id());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};

    use super::*;
    use crate::backend::MockGpioBackend;

    const CHIP: &str = "/dev/gpiochip0";

    fn relay(invert_relay: bool) -> (MockGpioBackend, LineHandle<MockGpioBackend>) {
        let backend = MockGpioBackend::new().with_chip(CHIP, 8);
        let registry = Arc::new(LineRegistry::new(Arc::new(backend.clone())));
        let relay = registry
            .acquire(&LineId::new(CHIP, 5), &LineSettings::output(), AcquireMode::Exclusive)
            .expect("relay");
        relay.write(!invert_relay).expect("idle");
        (backend, relay)
    }

    #[test]
    fn interrupted_hold_restores_idle() {
        for invert_relay in [false, true] {
            let (backend, relay) = relay(invert_relay);
            let id = LineId::new(CHIP, 5);

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                let _pulse = RelayPulse::start(&relay, invert_relay).expect("pulse");
                assert_eq!(backend.level(&id), Some(invert_relay));
                panic!("hold interrupted");
            }));

            assert!(result.is_err());
            assert_eq!(backend.level(&id), Some(!invert_relay));
            let levels: Vec<bool> = backend.writes(&id).iter().map(|w| w.level).collect();
            assert_eq!(levels, vec![!invert_relay, invert_relay, !invert_relay]);
        }
    }
}
