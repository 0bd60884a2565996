mod app;
mod config;
mod identity;
mod methods;
mod notify;
mod probe;
mod transport;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::{App, AppConfig};
use config::Config;
use notify::Notifier;

/// Device probe agent reporting to an MQTT manager
#[derive(Parser)]
#[command(name = "probe-agent")]
struct Cli {
    /// KEY=VALUE config file naming PROBE_METHODS and PROBE_CAPABILITIES
    #[arg(long = "config_file")]
    config_file: PathBuf,

    /// Broker host
    #[arg(long = "mqtt_hostname")]
    mqtt_hostname: String,

    /// Broker TLS port
    #[arg(long = "mqtt_port", default_value_t = 8883)]
    mqtt_port: u16,

    /// CA certificate (PEM)
    #[arg(long = "ca_certificate")]
    ca_certificate: PathBuf,

    /// Client certificate (PEM)
    #[arg(long)]
    certfile: PathBuf,

    /// Client key (PEM)
    #[arg(long)]
    keyfile: PathBuf,

    /// Log filter directive (error, warn, info, debug, trace)
    #[arg(long, default_value = "error")]
    loglevel: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_new(&cli.loglevel).unwrap_or_else(|_| EnvFilter::new("error")))
        .init();

    let notify = Notifier::new();
    notify.status("Startup...");

    let user_config = Config::load(&cli.config_file);
    info!("Config: {user_config:?}");

    let app_config = AppConfig {
        mqtt_hostname: cli.mqtt_hostname,
        mqtt_port: cli.mqtt_port,
        ca_certificate: cli.ca_certificate,
        certfile: cli.certfile,
        keyfile: cli.keyfile,
        ..Default::default()
    };

    let mut app = App::new(app_config, user_config, notify)?;
    tokio::select! {
        _ = app.run() => {}
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
