use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::config::EdgeDetect;
use crate::debounce::DebounceWindow;
use crate::error::AppError;
use crate::gpio::{Bias, Direction, EdgeEvent, EdgeKind, GpioBackend, LineId, LineRequest, LineSettings};

/// In-memory chips for tests and development without hardware.
///
/// Behaves like the character device where it matters: unknown chips and
/// out-of-range offsets are unavailable, a line can only be requested once,
/// inputs idle at their bias level and edges are filtered by the programmed
/// debounce period.
#[derive(Default, Clone)]
pub struct MockGpioBackend {
    shared: Arc<MockShared>,
}

#[derive(Default)]
struct MockShared {
    state: Mutex<MockState>,
    edge_ready: Condvar,
}

#[derive(Default)]
struct MockState {
    chips: FxHashMap<String, u32>,
    lines: FxHashMap<LineId, MockLine>,
    loopbacks: FxHashMap<LineId, LineId>, // output -> input
}

struct MockLine {
    settings: LineSettings,
    requested: bool,
    output: bool,
    driven: Option<bool>,
    faulty: bool,
    events: VecDeque<EdgeEvent>,
    debounce: DebounceWindow,
    writes: Vec<LevelChange>,
}

impl MockLine {
    fn new() -> Self {
        Self {
            settings: LineSettings::input(Default::default()),
            requested: false,
            output: false,
            driven: None,
            faulty: false,
            events: VecDeque::new(),
            debounce: DebounceWindow::new(Duration::ZERO),
            writes: Vec::new(),
        }
    }

    fn level(&self) -> bool {
        match self.settings.direction {
            Direction::Output if self.requested => self.output,
            _ => self.driven.unwrap_or(self.settings.bias == Bias::PullUp),
        }
    }
}

/// One write observed on a mock output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelChange {
    pub level: bool,
    pub at: Instant,
}

impl MockGpioBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chip(self, path: &str, num_lines: u32) -> Self {
        self.add_chip(path, num_lines);
        self
    }

    pub fn add_chip(&self, path: &str, num_lines: u32) {
        self.shared
            .state
            .lock()
            .chips
            .insert(path.to_string(), num_lines);
    }

    /// Drives an input line from outside, as wiring or a switch contact would.
    pub fn set_level(&self, id: &LineId, level: bool) {
        let mut state = self.shared.state.lock();
        Self::drive(&mut state, id, level);
        self.shared.edge_ready.notify_all();
    }

    /// Routes every write on `output` to `input`.
    pub fn wire(&self, output: &LineId, input: &LineId) {
        let mut state = self.shared.state.lock();
        state.loopbacks.insert(output.clone(), input.clone());
        let level = state.lines.get(output).map(MockLine::level);
        if let Some(level) = level {
            Self::drive(&mut state, input, level);
        }
    }

    /// Makes reads and writes on `id` fail until cleared.
    pub fn set_faulty(&self, id: &LineId, faulty: bool) {
        let mut state = self.shared.state.lock();
        state
            .lines
            .entry(id.clone())
            .or_insert_with(MockLine::new)
            .faulty = faulty;
    }

    pub fn level(&self, id: &LineId) -> Option<bool> {
        self.shared.state.lock().lines.get(id).map(MockLine::level)
    }

    pub fn writes(&self, id: &LineId) -> Vec<LevelChange> {
        self.shared
            .state
            .lock()
            .lines
            .get(id)
            .map(|l| l.writes.clone())
            .unwrap_or_default()
    }

    pub fn clear_writes(&self, id: &LineId) {
        if let Some(line) = self.shared.state.lock().lines.get_mut(id) {
            line.writes.clear();
        }
    }

    pub fn settings(&self, id: &LineId) -> Option<LineSettings> {
        self.shared
            .state
            .lock()
            .lines
            .get(id)
            .filter(|l| l.requested)
            .map(|l| l.settings.clone())
    }

    pub fn is_requested(&self, id: &LineId) -> bool {
        self.shared
            .state
            .lock()
            .lines
            .get(id)
            .map(|l| l.requested)
            .unwrap_or(false)
    }

    pub fn requested_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .lines
            .values()
            .filter(|l| l.requested)
            .count()
    }

    fn drive(state: &mut MockState, id: &LineId, level: bool) {
        let line = state.lines.entry(id.clone()).or_insert_with(MockLine::new);
        let old = line.level();
        line.driven = Some(level);
        let new = line.level();

        if !line.requested || line.settings.direction != Direction::Input || old == new {
            return;
        }
        let edge = if new { EdgeKind::Rising } else { EdgeKind::Falling };
        if edge_matches(line.settings.edge, edge) && line.debounce.accept(Instant::now()) {
            line.events.push_back(EdgeEvent {
                offset: id.offset,
                edge,
                timestamp_ns: epoch_nanos(),
            });
        }
    }
}

impl GpioBackend for MockGpioBackend {
    type Request = MockLineRequest;

    fn request_lines(
        &self,
        chip: &str,
        offsets: &[u32],
        settings: &LineSettings,
    ) -> Result<MockLineRequest, AppError> {
        let mut state = self.shared.state.lock();

        let num_lines = *state
            .chips
            .get(chip)
            .ok_or_else(|| AppError::DeviceUnavailable(format!("open chip {chip}: no such device")))?;

        for &offset in offsets {
            if offset >= num_lines {
                return Err(AppError::DeviceUnavailable(format!(
                    "offset {offset} out of range for {chip} ({num_lines} lines)"
                )));
            }
            let id = LineId::new(chip, offset);
            if state.lines.get(&id).map(|l| l.requested).unwrap_or(false) {
                return Err(AppError::DeviceUnavailable(format!("{id}: device or resource busy")));
            }
        }

        for &offset in offsets {
            let line = state
                .lines
                .entry(LineId::new(chip, offset))
                .or_insert_with(MockLine::new);
            line.requested = true;
            line.output = false;
            line.events.clear();
            line.settings = settings.clone();
            line.debounce.set_period(settings.debounce);
        }

        Ok(MockLineRequest {
            shared: self.shared.clone(),
            chip: chip.to_string(),
            offsets: offsets.to_vec(),
        })
    }
}

pub struct MockLineRequest {
    shared: Arc<MockShared>,
    chip: String,
    offsets: Vec<u32>,
}

impl MockLineRequest {
    fn line_id(&self, offset: u32) -> LineId {
        LineId::new(self.chip.as_str(), offset)
    }

    fn has_events(&self, state: &MockState) -> bool {
        self.offsets.iter().any(|&o| {
            state
                .lines
                .get(&self.line_id(o))
                .map(|l| !l.events.is_empty())
                .unwrap_or(false)
        })
    }

    fn check_offset(&self, offset: u32) -> Result<LineId, AppError> {
        if self.offsets.contains(&offset) {
            Ok(self.line_id(offset))
        } else {
            Err(AppError::InvalidState(format!(
                "offset {offset} is not part of this request"
            )))
        }
    }
}

impl LineRequest for MockLineRequest {
    fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    fn reconfigure(&mut self, settings: &LineSettings) -> Result<(), AppError> {
        let mut state = self.shared.state.lock();
        for &offset in &self.offsets {
            if let Some(line) = state.lines.get_mut(&self.line_id(offset)) {
                line.settings = settings.clone();
                line.debounce.set_period(settings.debounce);
            }
        }
        Ok(())
    }

    fn value(&self, offset: u32) -> Result<bool, AppError> {
        let id = self.check_offset(offset)?;
        let state = self.shared.state.lock();
        let line = state
            .lines
            .get(&id)
            .ok_or_else(|| AppError::LineRead(format!("{id} vanished")))?;
        if line.faulty {
            return Err(AppError::LineRead(format!("get value {id}: input/output error")));
        }
        Ok(line.level())
    }

    fn set_value(&mut self, offset: u32, active: bool) -> Result<(), AppError> {
        let id = self.check_offset(offset)?;
        let mut state = self.shared.state.lock();
        let line = state
            .lines
            .get_mut(&id)
            .ok_or_else(|| AppError::LineWrite(format!("{id} vanished")))?;
        if line.faulty {
            return Err(AppError::LineWrite(format!("set value {id}: input/output error")));
        }
        if !line.settings.is_writable() {
            return Err(AppError::LineWrite(format!("{id} is not an output")));
        }
        line.output = active;
        line.writes.push(LevelChange {
            level: active,
            at: Instant::now(),
        });

        if let Some(input) = state.loopbacks.get(&id).cloned() {
            MockGpioBackend::drive(&mut state, &input, active);
            self.shared.edge_ready.notify_all();
        }
        Ok(())
    }

    fn wait_edge_events(&self, timeout: Option<Duration>) -> Result<bool, AppError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.state.lock();
        loop {
            if self.has_events(&state) {
                return Ok(true);
            }
            match deadline {
                None => self.shared.edge_ready.wait(&mut state),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Ok(false);
                    }
                    if self
                        .shared
                        .edge_ready
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        return Ok(self.has_events(&state));
                    }
                }
            }
        }
    }

    fn read_edge_events(&mut self) -> Result<Vec<EdgeEvent>, AppError> {
        let mut state = self.shared.state.lock();
        let mut events = Vec::new();
        for &offset in &self.offsets {
            if let Some(line) = state.lines.get_mut(&self.line_id(offset)) {
                events.extend(line.events.drain(..));
            }
        }
        Ok(events)
    }

    fn release(self) -> Result<(), AppError> {
        let mut state = self.shared.state.lock();
        for &offset in &self.offsets {
            if let Some(line) = state.lines.get_mut(&self.line_id(offset)) {
                line.requested = false;
                line.events.clear();
            }
        }
        Ok(())
    }
}

fn edge_matches(configured: EdgeDetect, observed: EdgeKind) -> bool {
    match configured {
        EdgeDetect::None => false,
        EdgeDetect::Rising => observed == EdgeKind::Rising,
        EdgeDetect::Falling => observed == EdgeKind::Falling,
        EdgeDetect::Both => true,
    }
}

fn epoch_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
