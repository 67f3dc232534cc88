//! Polaris Mount Driver CLI
//!
//! Connects to the head, runs the handshake gate and streams mount events
//! to the log until interrupted.

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;

use polaris_mount::{load_config, Config, MountEvent, MountSession};

#[derive(Parser)]
#[command(name = "polaris-mount")]
#[command(about = "Protocol bridge driver for the Benro Polaris mount head")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Mount host address (overrides config file)
    #[arg(long)]
    host: Option<String>,

    /// Mount TCP port (overrides config file)
    #[arg(long)]
    port: Option<u16>,

    /// Log level
    #[arg(short, long, default_value = "info", value_parser = parse_log_level)]
    log_level: Level,
}

fn parse_log_level(s: &str) -> Result<Level, String> {
    s.parse().map_err(|_| {
        format!(
            "Invalid log level: {}. Use: trace, debug, info, warn, error",
            s
        )
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    let mut config = if let Some(config_path) = &args.config {
        tracing::debug!("Loading configuration from {:?}", config_path);
        load_config(config_path)?
    } else {
        tracing::debug!("Using default configuration");
        Config::default()
    };

    if let Some(host) = args.host {
        config.connection.host = host;
    }
    if let Some(port) = args.port {
        config.connection.port = port;
    }

    tracing::info!("Starting Polaris mount driver");
    #[cfg(feature = "mock")]
    tracing::info!("Running in MOCK MODE - no real hardware");
    tracing::info!("Mount address: {}", config.connection.addr());

    #[cfg(feature = "mock")]
    let session = MountSession::with_collaborators(
        config,
        std::sync::Arc::new(polaris_mount::MockConnectionFactory::new()),
        std::sync::Arc::new(polaris_mount::SystemClock::new()),
    );
    #[cfg(not(feature = "mock"))]
    let session = MountSession::new(config);

    let mut events = session.subscribe();
    session.connect().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, disconnecting");
                break;
            }
            event = events.recv() => match event {
                Ok(MountEvent::OrientationUpdated { right_ascension, declination }) => {
                    tracing::info!("Orientation: RA {:.4}h DEC {:.4}", right_ascension, declination);
                }
                Ok(MountEvent::TrackingStateChanged { state }) => {
                    tracing::info!("Tracking state: {}", state);
                }
                Ok(MountEvent::BatteryUpdated(battery)) => {
                    tracing::info!("Battery: {:.0}% (charging: {})", battery.capacity, battery.charging);
                }
                Ok(MountEvent::StorageUpdated(storage)) => {
                    tracing::info!("Storage: {:.0} free of {:.0}", storage.free, storage.total);
                }
                Ok(MountEvent::DeviceInfoUpdated(info)) => {
                    tracing::info!("Device: hw {} sw {}", info.hardware, info.software);
                }
                Ok(MountEvent::ConnectionLost { reason }) => {
                    tracing::error!("Connection lost: {}", reason);
                    break;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event stream lagged, {} events dropped", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    session.disconnect().await;
    Ok(())
}
