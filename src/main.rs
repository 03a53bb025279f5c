use anyhow::Result;
use clap::Parser;
use tapo_exporter::{
    client::HttpConnector,
    config::{CliOverrides, Settings},
    exporter::Exporter,
    metrics::self_metrics,
    server::{start_server, AppState},
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tapo Exporter - Prometheus metrics exporter for Tapo smart plugs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Address on which to expose metrics
    #[arg(long, value_name = "ADDR")]
    listen_address: Option<String>,

    /// Devices to query (overrides the configured list)
    #[arg(value_name = "DEVICE")]
    devices: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();

    // Load configuration
    let overrides = CliOverrides {
        listen_address: args.listen_address,
        devices: args.devices,
    };
    let settings = Settings::load_with_overrides(args.config.as_deref(), &overrides)?;

    // Initialize logging
    init_logging(&settings.exporter.log_level, &settings.exporter.log_format)?;

    info!("Starting Tapo Exporter {}", env!("CARGO_PKG_VERSION"));
    info!("Listen address: {}", settings.exporter.listen_address);

    // Every device gets a session up front; any failure here is fatal
    let connector = HttpConnector::new(&settings.tapo)?;
    let exporter = Exporter::new(
        &settings.tapo.devices,
        &connector,
        &settings.tapo.power_models,
    )?;
    info!("Polling devices: {:?}", exporter.addresses().await);

    let registry = self_metrics(settings.exporter.disable_exporter_metrics)?;
    let state = AppState::new(exporter, registry, &settings.exporter.telemetry_path);

    // Start HTTP server
    info!("Starting HTTP server...");
    if let Err(e) = start_server(&settings.exporter.listen_address, state).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}

/// Initialize structured logging with tracing.
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let json = log_format == "json";

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();

    Ok(())
}
