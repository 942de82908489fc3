pub mod bus;
pub mod channels;
pub mod checksum;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod framing;
pub mod liveness;
pub mod meter;
pub mod mqtt;
pub mod options;
pub mod prelude;
pub mod registry;
pub mod scheduler;
pub mod sensor;
pub mod solax;
pub mod transport;
pub mod utils;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::coordinator::Coordinator;
use crate::mqtt::Mqtt;
use crate::prelude::*;
use crate::transport::{SerialTransport, SystemClock};

use log::LevelFilter;
use std::sync::Arc;
use std::time::Duration;

pub async fn app() -> Result<()> {
    let options = Options::new();

    init_logging();

    info!(
        "solax-bridge {} starting with config file: {}",
        CARGO_PKG_VERSION, options.config_file
    );

    let config = ConfigWrapper::new(options.config_file.clone()).map_err(|err| {
        error!("Failed to load config: {:?}", err);
        err
    })?;

    set_loglevel(&config.loglevel());

    let channels = Channels::new();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    info!("Initializing components...");
    let mut coordinator = Coordinator::new(config.clone(), channels.clone(), clock, |bus| {
        Ok(Box::new(SerialTransport::open(bus)?) as Box<dyn Transport>)
    })?;

    let mqtt = Mqtt::new(config.clone(), channels.clone());
    let mqtt_handle = {
        let mqtt = mqtt.clone();
        tokio::spawn(async move {
            if let Err(e) = mqtt.start().await {
                error!("MQTT task failed: {}", e);
            }
        })
    };

    let shutdown = channels.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", e);
            return;
        }
        info!("Shutdown signal received, stopping components...");
        let _ = shutdown.from_mqtt.send(mqtt::ChannelData::Shutdown);
    });

    coordinator
        .start(options.runtime.map(Duration::from_secs))
        .await?;

    mqtt.stop();
    if tokio::time::timeout(Duration::from_secs(5), mqtt_handle).await.is_err() {
        warn!("MQTT client did not stop within 5s");
    }

    info!("Shutdown complete");
    Ok(())
}

fn init_logging() {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Trace)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .init();

    // narrowed again once the config has been read
    log::set_max_level(LevelFilter::Info);
}

fn set_loglevel(level: &str) {
    match LevelFilter::from_str(level) {
        Ok(filter) => log::set_max_level(filter),
        Err(_) => warn!("unknown loglevel {}, staying at info", level),
    }
}
