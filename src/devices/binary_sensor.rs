use log::{debug, trace, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BinarySensorConfig, EdgeDetect, EntityConfig, PullMode};
use crate::debounce::{LevelTracker, Transition, logical_level};
use crate::error::AppError;
use crate::gpio::{GpioBackend, LineId, LineSettings};
use crate::registry::{AcquireMode, LineHandle, LineRegistry};

use super::{EntityInfo, EntityState, StateNotifier, StateUpdate};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct BinarySensorOptions {
    pub line: LineId,
    pub pull_mode: PullMode,
    pub detect_edges: EdgeDetect,
    pub bouncetime_ms: u64,
    pub invert_logic: bool,
    pub mode: AcquireMode,
}

impl BinarySensorOptions {
    /// Resolves a config section. Unknown edge modes fail here, before any line is touched.
    pub fn from_config(
        cfg: &BinarySensorConfig,
        default_device: &str,
        mode: AcquireMode,
    ) -> Result<Self, AppError> {
        Ok(Self {
            line: LineId::new(cfg.resolve_device(default_device), cfg.port),
            pull_mode: PullMode::from_config(&cfg.pull_mode),
            detect_edges: cfg.detect_edges.parse()?,
            bouncetime_ms: cfg.bouncetime,
            invert_logic: cfg.invert_logic,
            mode,
        })
    }
}

/// Read-only input whose state is re-read whenever the kernel reports edges.
pub struct BinarySensor<B: GpioBackend> {
    info: EntityInfo,
    line: LineHandle<B>,
    invert_logic: bool,
    poll_interval: Duration,
    tracker: LevelTracker,
    notifier: Arc<dyn StateNotifier>,
}

impl<B: GpioBackend> BinarySensor<B> {
    pub fn new(
        registry: &Arc<LineRegistry<B>>,
        info: EntityInfo,
        options: &BinarySensorOptions,
        notifier: Arc<dyn StateNotifier>,
    ) -> Result<Self, AppError> {
        let line = registry.acquire(
            &options.line,
            &LineSettings::input(options.pull_mode),
            options.mode,
        )?;
        let settings = LineSettings::input(options.pull_mode)
            .with_edge_detection(options.detect_edges, options.bouncetime_ms)?;
        line.reconfigure(&settings)?;

        debug!(
            "binary sensor {} on {} ({:?}, {} edges, {} ms)",
            info.id, options.line, options.pull_mode, options.detect_edges, options.bouncetime_ms
        );

        Ok(Self {
            info,
            line,
            invert_logic: options.invert_logic,
            poll_interval: Duration::from_millis(options.bouncetime_ms).max(MIN_POLL_INTERVAL),
            tracker: LevelTracker::default(),
            notifier,
        })
    }

    pub fn info(&self) -> &EntityInfo {
        &self.info
    }

    pub fn lines(&self) -> Vec<LineId> {
        vec![self.line.id().clone()]
    }

    /// The host should drive [`poll`](Self::poll) at this cadence.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// `None` until the first successful read.
    pub fn is_on(&self) -> Option<bool> {
        self.tracker
            .level()
            .map(|raw| logical_level(raw, self.invert_logic))
    }

    pub fn state(&self) -> EntityState {
        EntityState::BinarySensor {
            is_on: self.is_on(),
        }
    }

    /// Re-reads the line and notifies when the state moved, including the
    /// first read and a read error that drops a known state to unknown.
    pub fn update(&mut self) -> Result<Option<bool>, AppError> {
        let was_known = self.tracker.level().is_some();
        match self.refresh() {
            Ok(transition) => {
                if transition.is_change() {
                    self.notify();
                }
                Ok(self.is_on())
            }
            Err(e) => {
                if was_known {
                    self.notify();
                }
                Err(e)
            }
        }
    }

    /// One poll cycle: drain pending edges without blocking and, if any
    /// arrived, re-read the level and notify exactly once, even when the
    /// batch settled back on the previous level. Returns whether a
    /// notification was sent.
    pub fn poll(&mut self) -> Result<bool, AppError> {
        let events = self.line.wait_and_drain(Some(Duration::ZERO))?;
        if events.is_empty() {
            return Ok(false);
        }
        trace!("{} drained {} edges", self.info.id, events.len());

        let result = self.refresh();
        if let Err(e) = &result {
            warn!("{} went unknown: {e}", self.info.id);
        }
        self.notify();
        result.map(|_| true)
    }

    fn refresh(&mut self) -> Result<Transition, AppError> {
        match self.line.read() {
            Ok(raw) => {
                let transition = self.tracker.observe(raw);
                if transition.is_change() {
                    debug!("{} reads {}", self.info.id, transition.level());
                }
                Ok(transition)
            }
            Err(e) => {
                self.tracker.invalidate();
                Err(e)
            }
        }
    }

    fn notify(&self) {
        self.notifier
            .notify(StateUpdate::new(&self.info.id, self.state(), true));
    }
}
