use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use sta_model::{Entity, EntityType};
use sta_server::{init_logging, LoggingMode, Overrides, ServerConfig, StaServer};
use tracing::info;

/// SensorThings notification server
///
/// Keeps entities in memory and publishes every change to broker clients
/// subscribed to the matching resource path.
#[derive(Parser, Debug)]
#[command(name = "sta-server")]
#[command(about = "SensorThings change notifications over MQTT")]
#[command(version)]
pub struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Broker client: embedded or mqtt
    #[arg(long)]
    pub broker_client: Option<String>,

    /// URL of the notification broker, e.g. tcp://localhost:1883
    #[arg(long)]
    pub broker_url: Option<String>,

    /// Message bus: internal or mqtt
    #[arg(long)]
    pub bus: Option<String>,

    /// Accept $filter in subscriptions
    #[arg(long)]
    pub allow_filter: bool,

    /// Start without the notification subsystem
    #[arg(long)]
    pub no_notifications: bool,

    /// Seconds between status log lines, 0 to disable
    #[arg(long)]
    pub status_interval: Option<u64>,

    /// Log output: silent, compact, verbose or json
    #[arg(long, default_value = "compact")]
    pub log_mode: String,

    /// Store a sample Thing with one Datastream at startup
    #[arg(long)]
    pub seed: bool,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            config_path: self.config.clone(),
            disable_notifications: self.no_notifications,
            allow_filter: self.allow_filter,
            broker_client: self.broker_client.clone(),
            broker_url: self.broker_url.clone(),
            bus: self.bus.clone(),
            status_interval_secs: self.status_interval,
        }
    }
}

fn seed(server: &StaServer) -> Result<()> {
    let store = server.store();
    store.insert(
        Entity::new(EntityType::Thing, 1)
            .with_property("name", "Weather station")
            .with_property("description", "Rooftop station"),
    )?;
    store.insert(
        Entity::new(EntityType::Sensor, 1)
            .with_property("name", "PT100")
            .with_property("encodingType", "application/pdf"),
    )?;
    store.insert(
        Entity::new(EntityType::ObservedProperty, 1)
            .with_property("name", "Air temperature")
            .with_property("definition", "http://vocab.example.org/AirTemperature"),
    )?;
    store.insert(
        Entity::new(EntityType::Datastream, 1)
            .with_property("name", "Air temperature")
            .with_property(
                "unitOfMeasurement",
                json!({"name": "degree Celsius", "symbol": "°C"}),
            )
            .with_link("Thing", 1)
            .with_link("Sensor", 1)
            .with_link("ObservedProperty", 1),
    )?;

    info!("Seeded Thing 1 with Datastream 1; publish observations to v1.0/Datastreams(1)/Observations");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mode: LoggingMode = args.log_mode.parse()?;
    init_logging(mode)?;

    let overrides = args.overrides();
    let config = ServerConfig::load_or_default(overrides.config_path.as_deref())?.apply(&overrides);

    let server = tokio::task::spawn_blocking(move || StaServer::start(config))
        .await
        .context("server startup task failed")??;

    if args.seed {
        seed(&server).context("failed to seed the store")?;
    }

    info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("Shutting down");
    tokio::task::spawn_blocking(move || server.shutdown())
        .await
        .context("server shutdown task failed")?;
    Ok(())
}
