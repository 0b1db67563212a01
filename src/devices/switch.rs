use log::debug;
use std::sync::Arc;

use crate::config::{EntityConfig, SwitchConfig};
use crate::debounce::raw_level;
use crate::error::AppError;
use crate::gpio::{GpioBackend, LineId, LineSettings};
use crate::registry::{AcquireMode, LineHandle, LineRegistry};

use super::{EntityInfo, EntityState, StateNotifier, StateUpdate};

#[derive(Debug, Clone)]
pub struct SwitchOptions {
    pub line: LineId,
    pub invert_logic: bool,
    pub mode: AcquireMode,
}

impl SwitchOptions {
    pub fn from_config(cfg: &SwitchConfig, default_device: &str, mode: AcquireMode) -> Self {
        Self {
            line: LineId::new(cfg.resolve_device(default_device), cfg.port),
            invert_logic: cfg.invert_logic,
            mode,
        }
    }
}

/// Output line with no read-back: the logical state is whatever was last written.
pub struct Switch<B: GpioBackend> {
    info: EntityInfo,
    line: LineHandle<B>,
    invert_logic: bool,
    is_on: bool,
    notifier: Arc<dyn StateNotifier>,
}

impl<B: GpioBackend> Switch<B> {
    /// Requests the line and drives it to the off level.
    pub fn new(
        registry: &Arc<LineRegistry<B>>,
        info: EntityInfo,
        options: &SwitchOptions,
        notifier: Arc<dyn StateNotifier>,
    ) -> Result<Self, AppError> {
        let line = registry.acquire(&options.line, &LineSettings::output(), options.mode)?;
        line.write(raw_level(false, options.invert_logic))?;
        debug!("switch {} on {} starts off", info.id, options.line);

        Ok(Self {
            info,
            line,
            invert_logic: options.invert_logic,
            is_on: false,
            notifier,
        })
    }

    pub fn info(&self) -> &EntityInfo {
        &self.info
    }

    pub fn lines(&self) -> Vec<LineId> {
        vec![self.line.id().clone()]
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    pub fn state(&self) -> EntityState {
        EntityState::Switch { is_on: self.is_on }
    }

    pub fn turn_on(&mut self) -> Result<(), AppError> {
        self.set(true)
    }

    pub fn turn_off(&mut self) -> Result<(), AppError> {
        self.set(false)
    }

    fn set(&mut self, on: bool) -> Result<(), AppError> {
        self.line.write(raw_level(on, self.invert_logic))?;
        self.is_on = on;
        self.notifier
            .notify(StateUpdate::new(&self.info.id, self.state(), false));
        Ok(())
    }
}
