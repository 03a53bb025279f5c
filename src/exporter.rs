//! Fleet-wide scrape orchestration.
//!
//! The [`Exporter`] owns every configured [`Device`]. A scrape refreshes all
//! of them concurrently and returns once each has had its turn, so the scrape
//! takes about as long as the slowest device rather than the sum of all.

use crate::client::DeviceConnector;
use crate::device::Device;
use crate::error::Result;
use crate::metrics::MetricSink;
use futures_util::future::join_all;
use prometheus::core::Desc;
use prometheus::proto::MetricFamily;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Collector over a fixed set of devices.
pub struct Exporter {
    devices: Mutex<BTreeMap<String, Device>>,
}

impl Exporter {
    /// Build one device per distinct address.
    ///
    /// Fails if any session cannot be constructed; the exporter never starts
    /// with part of its fleet missing.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tapo_exporter::client::HttpConnector;
    /// use tapo_exporter::config::Settings;
    /// use tapo_exporter::exporter::Exporter;
    ///
    /// let settings = Settings::load(Some("config/default.toml")).unwrap();
    /// let connector = HttpConnector::new(&settings.tapo).unwrap();
    /// let exporter = Exporter::new(
    ///     &settings.tapo.devices,
    ///     &connector,
    ///     &settings.tapo.power_models,
    /// )
    /// .unwrap();
    /// ```
    pub fn new(
        addresses: &[String],
        connector: &dyn DeviceConnector,
        power_models: &[String],
    ) -> Result<Self> {
        let power_models: Arc<[String]> = Arc::from(power_models);
        let mut devices = BTreeMap::new();

        for address in addresses {
            let address = address.trim();
            if address.is_empty() || devices.contains_key(address) {
                continue;
            }

            let session = connector.connect(address)?;
            let device = Device::new(address, session, power_models.clone())?;
            devices.insert(address.to_string(), device);
        }

        info!("Configured {} devices", devices.len());

        Ok(Self {
            devices: Mutex::new(devices),
        })
    }

    /// Number of configured devices.
    pub async fn len(&self) -> usize {
        self.devices.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.lock().await.is_empty()
    }

    /// Configured addresses in order.
    pub async fn addresses(&self) -> Vec<String> {
        self.devices.lock().await.keys().cloned().collect()
    }

    /// Descriptors for every metric the devices currently expose.
    pub async fn describe(&self) -> Vec<Desc> {
        let devices = self.devices.lock().await;

        let mut descs = Vec::new();
        for device in devices.values() {
            descs.extend(device.describe().await);
        }
        descs
    }

    /// Refresh every device concurrently and gather their metrics.
    ///
    /// The exporter lock is held for the whole call, so overlapping scrapes
    /// run one after the other.
    pub async fn collect(&self) -> Vec<MetricFamily> {
        let devices = self.devices.lock().await;
        let start = Instant::now();
        let sink = MetricSink::new();

        let units = devices.values().map(|device| {
            let sink = &sink;
            async move {
                if let Err(e) = device.scrape(sink).await {
                    warn!(device = device.address(), err = %e, "failed to collect device metrics");
                }
            }
        });
        join_all(units).await;

        debug!(op = "collect", time = ?start.elapsed(), "scrape finished");

        sink.gather()
    }
}
