use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{EdgeDetect, PullMode};
use crate::error::AppError;

/// A physical line, addressed by chip path and offset.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineId {
    pub chip: String,
    pub offset: u32,
}

impl LineId {
    pub fn new(chip: impl Into<String>, offset: u32) -> Self {
        Self {
            chip: chip.into(),
            offset,
        }
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chip, self.offset)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Input,
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Bias {
    #[default]
    None,
    PullUp,
    PullDown,
}

impl From<PullMode> for Bias {
    fn from(mode: PullMode) -> Self {
        match mode {
            PullMode::Up => Bias::PullUp,
            PullMode::Down => Bias::PullDown,
        }
    }
}

/// Complete settings for one requested line. Always replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSettings {
    pub direction: Direction,
    pub bias: Bias,
    pub edge: EdgeDetect,
    pub debounce: Duration,
}

impl LineSettings {
    pub fn output() -> Self {
        Self {
            direction: Direction::Output,
            bias: Bias::None,
            edge: EdgeDetect::None,
            debounce: Duration::ZERO,
        }
    }

    pub fn input(pull: PullMode) -> Self {
        Self {
            direction: Direction::Input,
            bias: pull.into(),
            edge: EdgeDetect::None,
            debounce: Duration::ZERO,
        }
    }

    /// Overlays edge detection on an input line, keeping direction and bias.
    pub fn with_edge_detection(&self, edge: EdgeDetect, debounce_ms: u64) -> Result<Self, AppError> {
        if edge == EdgeDetect::None {
            return Err(AppError::InvalidEdgeMode(
                "edge detection overlay requires rising, falling or both".into(),
            ));
        }
        let settings = Self {
            edge,
            debounce: Duration::from_millis(debounce_ms),
            ..self.clone()
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn is_writable(&self) -> bool {
        self.direction == Direction::Output
    }

    pub fn validate(&self) -> Result<(), AppError> {
        match self.direction {
            Direction::Output => {
                if self.edge != EdgeDetect::None {
                    return Err(AppError::InvalidState(
                        "edge detection requires an input line".into(),
                    ));
                }
                if self.bias != Bias::None {
                    return Err(AppError::InvalidState(
                        "bias is only supported on input lines".into(),
                    ));
                }
            }
            Direction::Input => {}
        }
        if self.edge == EdgeDetect::None && !self.debounce.is_zero() {
            return Err(AppError::InvalidState(
                "debouncing requires edge detection to be enabled".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeKind {
    Rising,
    Falling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeEvent {
    pub offset: u32,
    pub edge: EdgeKind,
    pub timestamp_ns: u64,
}

/// A chip driver able to hand out line requests.
pub trait GpioBackend: Send + Sync + 'static {
    type Request: LineRequest;

    fn request_lines(
        &self,
        chip: &str,
        offsets: &[u32],
        settings: &LineSettings,
    ) -> Result<Self::Request, AppError>;
}

/// A live, kernel-backed request over one or more lines of a single chip.
pub trait LineRequest: Send + 'static {
    fn offsets(&self) -> &[u32];

    fn num_lines(&self) -> usize {
        self.offsets().len()
    }

    fn reconfigure(&mut self, settings: &LineSettings) -> Result<(), AppError>;

    fn value(&self, offset: u32) -> Result<bool, AppError>;

    fn set_value(&mut self, offset: u32, active: bool) -> Result<(), AppError>;

    /// `Some(Duration::ZERO)` never blocks, `None` waits indefinitely.
    fn wait_edge_events(&self, timeout: Option<Duration>) -> Result<bool, AppError>;

    /// Reads whatever is currently queued, without blocking.
    fn read_edge_events(&mut self) -> Result<Vec<EdgeEvent>, AppError>;

    fn release(self) -> Result<(), AppError>
    where
        Self: Sized;
}
