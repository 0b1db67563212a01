use log::{debug, error, info};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{FairMutex, RwLock, RwLockUpgradableReadGuard};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::gpio::{EdgeEvent, GpioBackend, LineId, LineRequest, LineSettings};
use crate::poller;

/// How a caller wants to hold a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AcquireMode {
    /// Fail with `LineBusy` when the line is already held.
    #[default]
    Exclusive,
    /// Join an existing shared request, reconfiguring it in place.
    Shared,
}

/// Longest single blocking wait on a line request.
pub const WAIT_SLICE: Duration = Duration::from_millis(20);

// `None` once the kernel request has been released.
type SharedRequest<R> = Arc<FairMutex<Option<R>>>;

struct LineEntry<R> {
    request: SharedRequest<R>,
    settings: LineSettings,
    mode: AcquireMode,
    holders: usize,
}

/// Sole owner of every kernel line request in the process.
pub struct LineRegistry<B: GpioBackend> {
    backend: Arc<B>,
    lines: RwLock<FxHashMap<LineId, LineEntry<B::Request>>>,
}

impl<B: GpioBackend> LineRegistry<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            lines: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn acquire(
        self: &Arc<Self>,
        id: &LineId,
        settings: &LineSettings,
        mode: AcquireMode,
    ) -> Result<LineHandle<B>, AppError> {
        settings.validate()?;

        let lines = self.lines.upgradable_read();

        if let Some(entry) = lines.get(id) {
            if mode == AcquireMode::Exclusive || entry.mode == AcquireMode::Exclusive {
                return Err(AppError::LineBusy(format!("{id} is already requested")));
            }

            // count the new holder first so the request survives the unlocked reconfigure
            let request = {
                let mut lines = RwLockUpgradableReadGuard::upgrade(lines);
                let Some(entry) = lines.get_mut(id) else {
                    return Err(AppError::Gpio(format!("{id} vanished during acquire")));
                };
                entry.holders += 1;
                debug!("joining shared request for {id} ({} holders)", entry.holders);
                entry.request.clone()
            };
            let handle = LineHandle {
                id: id.clone(),
                request,
                registry: Arc::clone(self),
            };
            handle.reconfigure(settings)?;
            return Ok(handle);
        }

        // the upgradable guard is exclusive against other writers, so the
        // kernel request can be opened before upgrading
        let request = self
            .backend
            .request_lines(&id.chip, &[id.offset], settings)?;
        let request = Arc::new(FairMutex::new(Some(request)));

        let mut lines = RwLockUpgradableReadGuard::upgrade(lines);
        lines.insert(
            id.clone(),
            LineEntry {
                request: request.clone(),
                settings: settings.clone(),
                mode,
                holders: 1,
            },
        );
        debug!("requested {id} as {:?}", settings.direction);

        Ok(LineHandle {
            id: id.clone(),
            request,
            registry: Arc::clone(self),
        })
    }

    /// Replaces the settings of an open request without closing it.
    pub fn reconfigure(&self, id: &LineId, settings: &LineSettings) -> Result<(), AppError> {
        settings.validate()?;

        let request = self
            .lines
            .read()
            .get(id)
            .map(|e| e.request.clone())
            .ok_or_else(|| AppError::InvalidState(format!("{id} is not requested")))?;
        {
            let mut guard = request.lock();
            let line = guard
                .as_mut()
                .ok_or_else(|| AppError::InvalidState(format!("{id} was released")))?;
            line.reconfigure(settings)?;
        }

        if let Some(entry) = self.lines.write().get_mut(id)
            && Arc::ptr_eq(&entry.request, &request)
        {
            entry.settings = settings.clone();
        }
        debug!("reconfigured {id}: {settings:?}");
        Ok(())
    }

    /// Closes the request for `id`. Releasing an unknown line is a no-op.
    pub fn release(&self, id: &LineId) {
        let entry = self.lines.write().remove(id);
        if let Some(entry) = entry {
            Self::close(id, &entry.request);
        }
    }

    /// Drains and closes every open request.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.lines.write().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            Self::close(&id, &entry.request);
        }
        info!("line registry drained, released {count} requests");
    }

    pub fn settings(&self, id: &LineId) -> Option<LineSettings> {
        self.lines.read().get(id).map(|e| e.settings.clone())
    }

    pub fn is_requested(&self, id: &LineId) -> bool {
        self.lines.read().contains_key(id)
    }

    pub fn open_requests(&self) -> usize {
        self.lines.read().len()
    }

    fn detach(&self, id: &LineId, request: &SharedRequest<B::Request>) {
        let mut lines = self.lines.write();
        let Some(entry) = lines.get_mut(id) else {
            return;
        };
        // the line may have been force-released and requested again since
        if !Arc::ptr_eq(&entry.request, request) {
            return;
        }
        entry.holders = entry.holders.saturating_sub(1);
        if entry.holders > 0 {
            debug!("{id} still held by {} holders", entry.holders);
            return;
        }
        if let Some(entry) = lines.remove(id) {
            drop(lines);
            Self::close(id, &entry.request);
        }
    }

    fn close(id: &LineId, request: &SharedRequest<B::Request>) {
        let Some(request) = request.lock().take() else {
            return;
        };
        match request.release() {
            Ok(()) => debug!("released {id}"),
            Err(e) => error!("release of {id} failed: {e}"),
        }
    }
}

/// Scoped access to one requested line. Dropping it releases the line.
pub struct LineHandle<B: GpioBackend> {
    id: LineId,
    request: SharedRequest<B::Request>,
    registry: Arc<LineRegistry<B>>,
}

impl<B: GpioBackend> LineHandle<B> {
    pub fn id(&self) -> &LineId {
        &self.id
    }

    pub fn settings(&self) -> Option<LineSettings> {
        self.registry.settings(&self.id)
    }

    pub fn reconfigure(&self, settings: &LineSettings) -> Result<(), AppError> {
        self.registry.reconfigure(&self.id, settings)
    }

    pub fn read(&self) -> Result<bool, AppError> {
        let guard = self.request.lock();
        let request = guard
            .as_ref()
            .ok_or_else(|| AppError::LineRead(format!("{} was released", self.id)))?;
        request.value(self.id.offset)
    }

    pub fn write(&self, active: bool) -> Result<(), AppError> {
        let mut guard = self.request.lock();
        let request = guard
            .as_mut()
            .ok_or_else(|| AppError::LineWrite(format!("{} was released", self.id)))?;
        request.set_value(self.id.offset, active)
    }

    /// Waits for edges in slices of at most [`WAIT_SLICE`], letting go of the
    /// request between slices so other callers and release are never held
    /// up for longer than one slice.
    pub fn wait_and_drain(&self, timeout: Option<Duration>) -> Result<Vec<EdgeEvent>, AppError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let slice = match deadline {
                Some(deadline) => deadline
                    .saturating_duration_since(Instant::now())
                    .min(WAIT_SLICE),
                None => WAIT_SLICE,
            };
            let events = {
                let mut guard = self.request.lock();
                let request = guard
                    .as_mut()
                    .ok_or_else(|| AppError::LineRead(format!("{} was released", self.id)))?;
                poller::wait_and_drain(request, Some(slice))?
            };
            if !events.is_empty() {
                return Ok(events);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(events);
            }
        }
    }
}

impl<B: GpioBackend> Drop for LineHandle<B> {
    fn drop(&mut self) {
        self.registry.detach(&self.id, &self.request);
    }
}
