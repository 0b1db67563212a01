use std::{collections::HashSet, fmt, fs, path::Path, str::FromStr};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEFAULT_DEVICE: &str = "/dev/gpiochip4";
pub const DEFAULT_BOUNCETIME_MS: u64 = 50;
pub const DEFAULT_RELAY_TIME_MS: u64 = 200;
pub const DEFAULT_PULL_MODE: &str = "UP";
pub const DEFAULT_DETECT_EDGES: &str = "BOTH";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
    pub timeout: u64,
}

/// Internal resistor selection for an input line.
#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PullMode {
    #[default]
    Up,
    Down,
}

impl PullMode {
    /// Legacy configs carry free-form pull modes, anything unrecognized falls back to `Up`.
    pub fn from_config(value: &str) -> Self {
        value.parse().unwrap_or_else(|e| {
            warn!("{e}, falling back to pull-up");
            PullMode::Up
        })
    }
}

impl FromStr for PullMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UP" => Ok(PullMode::Up),
            "DOWN" => Ok(PullMode::Down),
            _ => Err(AppError::InvalidPullMode(s.to_string())),
        }
    }
}

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeDetect {
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

impl FromStr for EdgeDetect {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => Ok(EdgeDetect::None),
            "RISING" => Ok(EdgeDetect::Rising),
            "FALLING" => Ok(EdgeDetect::Falling),
            "BOTH" => Ok(EdgeDetect::Both),
            _ => Err(AppError::InvalidEdgeMode(s.to_string())),
        }
    }
}

impl fmt::Display for EdgeDetect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EdgeDetect::None => "none",
            EdgeDetect::Rising => "rising",
            EdgeDetect::Falling => "falling",
            EdgeDetect::Both => "both",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BinarySensorConfig {
    pub name: String,
    pub port: u32,
    pub device: Option<String>,
    #[serde(default = "default_pull_mode")]
    pub pull_mode: String,
    #[serde(default = "default_bouncetime")]
    pub bouncetime: u64,
    #[serde(default)]
    pub invert_logic: bool,
    #[serde(default = "default_detect_edges")]
    pub detect_edges: String,
    pub unique_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SwitchConfig {
    pub name: String,
    pub port: u32,
    pub device: Option<String>,
    #[serde(default)]
    pub invert_logic: bool,
    pub unique_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CoverConfig {
    pub name: String,
    pub relay_pin: u32,
    pub state_pin: u32,
    pub device: Option<String>,
    #[serde(default = "default_pull_mode")]
    pub state_pull_mode: String,
    /// Relay hold in milliseconds.
    #[serde(default = "default_relay_time")]
    pub relay_time: u64,
    #[serde(default)]
    pub invert_state: bool,
    #[serde(default)]
    pub invert_relay: bool,
    pub unique_id: Option<String>,
}

/// Implemented by every entity section so ids and chips resolve the same way.
pub trait EntityConfig {
    fn name(&self) -> &str;
    fn unique_id(&self) -> Option<&str>;
    fn device(&self) -> Option<&str>;

    fn entity_id(&self) -> &str {
        self.unique_id().unwrap_or_else(|| self.name())
    }

    fn resolve_device<'a>(&'a self, default_device: &'a str) -> &'a str {
        self.device().unwrap_or(default_device)
    }
}

macro_rules! impl_entity_config {
    ($($ty:ty),+) => {
        $(impl EntityConfig for $ty {
            fn name(&self) -> &str {
                &self.name
            }

            fn unique_id(&self) -> Option<&str> {
                self.unique_id.as_deref()
            }

            fn device(&self) -> Option<&str> {
                self.device.as_deref()
            }
        })+
    };
}

impl_entity_config!(BinarySensorConfig, SwitchConfig, CoverConfig);

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    #[serde(default = "default_device")]
    pub default_device: String,
    /// Opt-in for several entities holding the same physical line.
    #[serde(default)]
    pub shared_lines: bool,
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default = "default_event_history_capacity")]
    pub event_history_capacity: usize,
    /// Seconds between state-line reads of each cover.
    #[serde(default = "default_scan_interval")]
    pub scan_interval: u64,
    #[serde(default)]
    pub binary_sensors: Vec<BinarySensorConfig>,
    #[serde(default)]
    pub switches: Vec<SwitchConfig>,
    #[serde(default)]
    pub covers: Vec<CoverConfig>,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        let config: AppConfig = serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.scan_interval == 0 {
            return Err(AppError::Config(
                "scan_interval must be greater than zero".into(),
            ));
        }
        if self.broadcast_capacity == 0 {
            return Err(AppError::Config(
                "broadcast_capacity must be greater than zero".into(),
            ));
        }

        let mut seen = HashSet::new();
        for entity in self.entity_configs() {
            if entity.name().trim().is_empty() {
                return Err(AppError::Config("entity name must not be empty".into()));
            }
            if !seen.insert(entity.entity_id()) {
                return Err(AppError::Config(format!(
                    "duplicate entity id {}",
                    entity.entity_id()
                )));
            }
        }
        Ok(())
    }

    fn entity_configs(&self) -> impl Iterator<Item = &dyn EntityConfig> {
        self.binary_sensors
            .iter()
            .map(|c| c as &dyn EntityConfig)
            .chain(self.switches.iter().map(|c| c as &dyn EntityConfig))
            .chain(self.covers.iter().map(|c| c as &dyn EntityConfig))
    }
}

fn default_device() -> String {
    DEFAULT_DEVICE.to_string()
}

fn default_pull_mode() -> String {
    DEFAULT_PULL_MODE.to_string()
}

fn default_detect_edges() -> String {
    DEFAULT_DETECT_EDGES.to_string()
}

fn default_bouncetime() -> u64 {
    DEFAULT_BOUNCETIME_MS
}

fn default_relay_time() -> u64 {
    DEFAULT_RELAY_TIME_MS
}

fn default_broadcast_capacity() -> usize {
    64
}

fn default_event_history_capacity() -> usize {
    32
}

fn default_scan_interval() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pull_mode_falls_back_to_up() {
        assert_eq!(PullMode::from_config("DOWN"), PullMode::Down);
        assert_eq!(PullMode::from_config("down"), PullMode::Down);
        assert_eq!(PullMode::from_config("sideways"), PullMode::Up);
        assert!(matches!(
            "sideways".parse::<PullMode>(),
            Err(AppError::InvalidPullMode(_))
        ));
    }

    #[test]
    fn unknown_edge_mode_is_rejected() {
        assert_eq!("BOTH".parse::<EdgeDetect>().ok(), Some(EdgeDetect::Both));
        assert_eq!("rising".parse::<EdgeDetect>().ok(), Some(EdgeDetect::Rising));
        assert!(matches!(
            "SOMETIMES".parse::<EdgeDetect>(),
            Err(AppError::InvalidEdgeMode(_))
        ));
    }

    #[test]
    fn entity_defaults_and_duplicates() {
        let config: AppConfig = serde_json::from_str(
            r#"{
                "http": { "host": "localhost:8080", "path": "/api", "timeout": 30 },
                "binary_sensors": [ { "name": "door", "port": 17 } ],
                "switches": [ { "name": "door", "port": 18, "device": "/dev/gpiochip0" } ]
            }"#,
        )
        .expect("valid config json");

        let sensor = &config.binary_sensors[0];
        assert_eq!(sensor.bouncetime, DEFAULT_BOUNCETIME_MS);
        assert_eq!(sensor.pull_mode, "UP");
        assert_eq!(sensor.resolve_device(&config.default_device), DEFAULT_DEVICE);
        assert_eq!(
            config.switches[0].resolve_device(&config.default_device),
            "/dev/gpiochip0"
        );
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }
}
