use log::warn;
use std::path::PathBuf;
use std::time::Duration;

use libgpiod::{chip::Chip, line, line::EventClock, request};

use crate::config::EdgeDetect;
use crate::error::AppError;
use crate::gpio::{Bias, Direction, EdgeEvent, EdgeKind, GpioBackend, LineRequest, LineSettings};

const LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY: usize = 64;

/// Character-device backend built on libgpiod v2.
pub struct LibgpiodBackend;

impl LibgpiodBackend {
    pub fn new() -> Result<Self, AppError> {
        Ok(Self)
    }

    fn open_chip(path: &str) -> Result<Chip, AppError> {
        let p = PathBuf::from(path);
        Chip::open(&p).map_err(|e| AppError::DeviceUnavailable(format!("open chip {path}: {e}")))
    }

    fn check_offsets(chip: &Chip, path: &str, offsets: &[u32]) -> Result<(), AppError> {
        let num_lines = chip
            .info()
            .map_err(|e| AppError::DeviceUnavailable(format!("chip info {path}: {e}")))?
            .num_lines();
        match offsets.iter().find(|&&o| o as usize >= num_lines) {
            Some(offset) => Err(AppError::DeviceUnavailable(format!(
                "offset {offset} out of range for {path} ({num_lines} lines)"
            ))),
            None => Ok(()),
        }
    }

    fn open_request(chip: &Chip, line_cfg: &line::Config) -> Result<request::Request, AppError> {
        let mut req_cfg =
            request::Config::new().map_err(|e| AppError::Gpio(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| AppError::Gpio(format!("request consumer: {e}")))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| AppError::DeviceUnavailable(format!("request lines: {e}")))
    }

    fn make_line_settings(settings: &LineSettings) -> Result<line::Settings, AppError> {
        let mut ls =
            line::Settings::new().map_err(|e| AppError::Gpio(format!("libgpiod settings: {e}")))?;

        match settings.direction {
            Direction::Output => {
                ls.set_direction(line::Direction::Output)
                    .map_err(|e| AppError::Gpio(format!("set direction: {e}")))?;
            }
            Direction::Input => {
                ls.set_direction(line::Direction::Input)
                    .map_err(|e| AppError::Gpio(format!("set direction: {e}")))?;
                let bias = match settings.bias {
                    Bias::None => None,
                    Bias::PullUp => Some(line::Bias::PullUp),
                    Bias::PullDown => Some(line::Bias::PullDown),
                };
                ls.set_bias(bias)
                    .map_err(|e| AppError::Gpio(format!("set bias: {e}")))?;
            }
        }

        if settings.edge != EdgeDetect::None {
            let edge = match settings.edge {
                EdgeDetect::None => None,
                EdgeDetect::Rising => Some(line::Edge::Rising),
                EdgeDetect::Falling => Some(line::Edge::Falling),
                EdgeDetect::Both => Some(line::Edge::Both),
            };
            ls.set_edge_detection(edge)
                .map_err(|e| AppError::Gpio(format!("set edge detection: {e}")))?;
            ls.set_event_clock(EventClock::Realtime)
                .map_err(|e| AppError::Gpio(format!("set event clock: {e}")))?;
            ls.set_debounce_period(settings.debounce);
        }

        Ok(ls)
    }

    fn make_line_config(offsets: &[u32], settings: line::Settings) -> Result<line::Config, AppError> {
        let mut cfg =
            line::Config::new().map_err(|e| AppError::Gpio(format!("line config: {e}")))?;
        cfg.add_line_settings(offsets, settings)
            .map_err(|e| AppError::Gpio(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }
}

impl GpioBackend for LibgpiodBackend {
    type Request = LibgpiodRequest;

    fn request_lines(
        &self,
        chip: &str,
        offsets: &[u32],
        settings: &LineSettings,
    ) -> Result<LibgpiodRequest, AppError> {
        let handle = Self::open_chip(chip)?;
        Self::check_offsets(&handle, chip, offsets)?;

        let line_settings = Self::make_line_settings(settings)?;
        let line_cfg = Self::make_line_config(offsets, line_settings)?;
        let request = Self::open_request(&handle, &line_cfg)?;
        let buffer = request::Buffer::new(LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY)
            .map_err(|e| AppError::Gpio(format!("event buffer: {e}")))?;

        Ok(LibgpiodRequest {
            request,
            buffer,
            offsets: offsets.to_vec(),
        })
    }
}

pub struct LibgpiodRequest {
    request: request::Request,
    buffer: request::Buffer,
    offsets: Vec<u32>,
}

impl LineRequest for LibgpiodRequest {
    fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    fn reconfigure(&mut self, settings: &LineSettings) -> Result<(), AppError> {
        let line_settings = LibgpiodBackend::make_line_settings(settings)?;
        let line_cfg = LibgpiodBackend::make_line_config(&self.offsets, line_settings)?;
        self.request
            .reconfigure_lines(&line_cfg)
            .map_err(|e| AppError::Gpio(format!("reconfigure lines: {e}")))
    }

    fn value(&self, offset: u32) -> Result<bool, AppError> {
        let value = self
            .request
            .value(offset)
            .map_err(|e| AppError::LineRead(format!("get value: {e}")))?;
        Ok(matches!(value, line::Value::Active))
    }

    fn set_value(&mut self, offset: u32, active: bool) -> Result<(), AppError> {
        let value = if active {
            line::Value::Active
        } else {
            line::Value::InActive
        };
        self.request
            .set_value(offset, value)
            .map_err(|e| AppError::LineWrite(format!("set value: {e}")))?;
        Ok(())
    }

    fn wait_edge_events(&self, timeout: Option<Duration>) -> Result<bool, AppError> {
        self.request
            .wait_edge_events(timeout)
            .map_err(|e| AppError::LineRead(format!("wait edge events: {e}")))
    }

    fn read_edge_events(&mut self) -> Result<Vec<EdgeEvent>, AppError> {
        let events = self
            .request
            .read_edge_events(&mut self.buffer)
            .map_err(|e| AppError::LineRead(format!("read edge events: {e}")))?;

        let mut batch = Vec::new();
        for evt in events {
            let evt = match evt {
                Ok(e) => e,
                Err(e) => {
                    warn!("skipping unreadable edge event: {e}");
                    continue;
                }
            };
            let edge = match evt.event_type() {
                Ok(line::EdgeKind::Rising) => EdgeKind::Rising,
                Ok(line::EdgeKind::Falling) => EdgeKind::Falling,
                Err(_) => continue,
            };
            batch.push(EdgeEvent {
                offset: evt.line_offset(),
                edge,
                timestamp_ns: evt.timestamp().as_nanos() as u64,
            });
        }
        Ok(batch)
    }

    fn release(self) -> Result<(), AppError> {
        // libgpiod releases the kernel request on drop
        drop(self.request);
        Ok(())
    }
}
