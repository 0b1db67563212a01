use log::{info, warn};
use std::io;
use std::path::Path;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};

use gpiohub::{AppConfig, AppState, DeviceHub, LineRegistry};

#[cfg(feature = "hardware-gpio")]
type Backend = gpiohub::LibgpiodBackend;
#[cfg(not(feature = "hardware-gpio"))]
type Backend = gpiohub::MockGpioBackend;

fn config_path() -> String {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GPIOHUB_CONFIG").ok())
        .unwrap_or_else(|| "config.json".to_string())
}

#[cfg(feature = "hardware-gpio")]
fn open_backend(_config: &AppConfig) -> io::Result<Backend> {
    Backend::new().map_err(io::Error::other)
}

#[cfg(not(feature = "hardware-gpio"))]
fn open_backend(config: &AppConfig) -> io::Result<Backend> {
    warn!("built without hardware-gpio, lines on {} are simulated", config.default_device);
    Ok(Backend::new().with_chip(&config.default_device, 64))
}

fn remove_stale_socket(path: &str) -> io::Result<()> {
    if Path::new(path).exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let config_path = config_path();
    let config = Arc::new(AppConfig::load_from_file(&config_path).map_err(io::Error::other)?);

    let registry = Arc::new(LineRegistry::new(Arc::new(open_backend(&config)?)));
    let hub = Arc::new(DeviceHub::new(config.clone(), registry));
    let report = hub.start().map_err(io::Error::other)?;
    for (id, e) in &report.failed {
        warn!("{id} is unavailable: {e}");
    }
    info!("{} entities ready", report.created.len());

    let state = AppState {
        hub: hub.clone(),
        config_path: Some(config_path),
    };
    let scope_path = config.http.path.clone();
    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .service(state.api_scope(&scope_path))
    });

    let mut bound = Vec::new();
    if let Some(socket_path) = &config.http.unix_socket {
        remove_stale_socket(socket_path)?;
        server = server.bind_uds(socket_path)?;
        bound.push(socket_path.clone());
    }
    if let Some(host) = &config.http.host {
        server = server.bind_auto_h2c(host)?;
        bound.push(host.clone());
    }
    if bound.is_empty() {
        hub.shutdown();
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "http config needs a unix_socket, a host, or both",
        ));
    }

    info!("listening on {}", bound.join(" and "));
    let result = server.run().await;
    hub.shutdown();
    result
}
