//! # Tapo Exporter
//!
//! A Prometheus metrics exporter for Tapo smart plugs.
//!
//! ## Overview
//!
//! Every scrape polls each configured plug concurrently and reports:
//!
//! - Whether the plug answered (`tapo_device_up`) and a running error count
//! - Relay state, on-time and overheat status
//! - Current power draw and today's runtime and energy, on models that report them
//!
//! A plug's metric set is discovered from its first successful reading and
//! never changes afterwards. Plugs that fail to answer report `up` and
//! `errors` only, so stale readings are never exposed.
//!
//! ## Quick Start
//!
//! ```no_run
//! use tapo_exporter::{
//!     client::HttpConnector, config::Settings, exporter::Exporter, metrics::self_metrics,
//!     server::{start_server, AppState},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load(Some("config/default.toml"))?;
//!
//!     let connector = HttpConnector::new(&settings.tapo)?;
//!     let exporter =
//!         Exporter::new(&settings.tapo.devices, &connector, &settings.tapo.power_models)?;
//!
//!     let state = AppState::new(exporter, self_metrics(false)?, "/metrics");
//!     start_server(&settings.exporter.listen_address, state).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! The exporter can be configured via:
//! - TOML configuration file
//! - Environment variables (with `TAPO_EXPORTER_` prefix)
//! - Command-line arguments
//!
//! See [`config::Settings`] for details.
//!
//! ## Modules
//!
//! - [`client`] - Device client seams and the HTTP implementation
//! - [`config`] - Configuration management
//! - [`device`] - Per-plug refresh and collect
//! - [`error`] - Error types and handling
//! - [`exporter`] - Concurrent scrape across all plugs
//! - [`metrics`] - Prometheus metric definitions
//! - [`server`] - HTTP server for exposing metrics

pub mod client;
pub mod config;
pub mod device;
pub mod error;
pub mod exporter;
pub mod metrics;
pub mod server;

pub use error::{Result, TapoError};
