pub mod backend;
pub mod config;
pub mod debounce;
pub mod devices;
pub mod error;
pub mod gpio;
pub mod hub;
pub mod poller;
pub mod registry;
pub mod routes;

pub use config::{AppConfig, EdgeDetect, HttpConfig, PullMode};
pub use devices::{BinarySensor, Cover, EntityState, StateNotifier, StateUpdate, Switch};
pub use error::AppError;
pub use gpio::{Bias, Direction, EdgeEvent, EdgeKind, GpioBackend, LineId, LineRequest, LineSettings};
pub use hub::{DeviceHub, EntityDescriptor, SetupReport};
pub use registry::{AcquireMode, LineHandle, LineRegistry};
pub use routes::AppState;

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::MockGpioBackend;
