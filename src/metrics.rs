//! Prometheus metrics definitions for Tapo devices.
//!
//! [`MetricSet`] is the per-device group of gauges created on first contact,
//! [`MetricSink`] collects one scrape's worth of metrics from every device,
//! and [`self_metrics`] builds the registry describing the exporter itself.

use crate::client::DeviceInfo;
use crate::error::{Result, TapoError};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Counter, Encoder, Gauge, Opts, Registry, TextEncoder};
use std::collections::HashMap;

pub const NAMESPACE: &str = "tapo";
pub const SUBSYSTEM: &str = "device";

/// Gauges for one device, labelled from the device's own metadata.
pub struct MetricSet {
    pub on: Gauge,
    pub on_time: Gauge,
    pub overheated: Gauge,
    pub power: Option<PowerMetrics>,
}

/// Energy gauges, only present on power-capable models.
pub struct PowerMetrics {
    pub current_power: Gauge,
    pub today_runtime: Gauge,
    pub today_energy: Gauge,
}

impl MetricSet {
    /// Build the metric schema from a device's first successful reading.
    ///
    /// Energy gauges are created when the reported model matches one of
    /// `power_models`, ignoring case.
    pub fn discover(info: &DeviceInfo, power_models: &[String]) -> Result<Self> {
        let labels = device_labels(info);

        let supports_power = power_models
            .iter()
            .any(|m| m.eq_ignore_ascii_case(&info.model));

        let power = if supports_power {
            Some(PowerMetrics {
                current_power: device_gauge("power", "power (watts)", &labels)?,
                today_runtime: device_gauge("today_runtime", "Runtime today (mins)", &labels)?,
                today_energy: device_gauge(
                    "today_energy",
                    "Energy today (watt-hours)",
                    &labels,
                )?,
            })
        } else {
            None
        };

        Ok(Self {
            on: device_gauge("on", "Is the plug on", &labels)?,
            // Gauge, not counter: the plug resets it.
            on_time: device_gauge("onTime", "Cumulative on time", &labels)?,
            overheated: device_gauge("overheated", "Is the plug overheated", &labels)?,
            power,
        })
    }

    pub fn supports_power(&self) -> bool {
        self.power.is_some()
    }

    /// Every gauge in the set, power gauges last.
    pub fn gauges(&self) -> Vec<&Gauge> {
        let mut gauges = vec![&self.on, &self.on_time, &self.overheated];
        if let Some(power) = &self.power {
            gauges.push(&power.current_power);
            gauges.push(&power.today_runtime);
            gauges.push(&power.today_energy);
        }
        gauges
    }
}

/// Const labels shared by every gauge in a [`MetricSet`].
pub fn device_labels(info: &DeviceInfo) -> HashMap<String, String> {
    let mut device_type = info.avatar.to_lowercase();
    if device_type.is_empty() {
        device_type = info.model.clone();
    }

    HashMap::from([
        ("model".to_string(), info.model.clone()),
        ("ip".to_string(), info.ip.clone()),
        ("mac".to_string(), info.mac.clone()),
        ("type".to_string(), device_type),
        ("name".to_string(), info.nickname.clone()),
    ])
}

fn device_opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE).subsystem(SUBSYSTEM)
}

fn device_gauge(name: &str, help: &str, labels: &HashMap<String, String>) -> Result<Gauge> {
    Ok(Gauge::with_opts(
        device_opts(name, help).const_labels(labels.clone()),
    )?)
}

/// `up` gauge for a configured address.
pub fn up_gauge(address: &str) -> Result<Gauge> {
    Ok(Gauge::with_opts(
        device_opts("up", "Is the device up").const_label("ip", address),
    )?)
}

/// `errors` counter for a configured address.
pub fn errors_counter(address: &str) -> Result<Counter> {
    Ok(Counter::with_opts(
        device_opts("errors", "Count of errors retrieving details").const_label("ip", address),
    )?)
}

/// Descriptors of a collector, cloned out of it.
pub fn descs<C: Collector>(metric: &C) -> Vec<Desc> {
    metric.desc().into_iter().cloned().collect()
}

pub fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Destination for one scrape's metrics.
///
/// Backed by a throwaway [`Registry`] so that samples pushed by different
/// devices under the same metric name are merged into one family on gather.
#[derive(Default)]
pub struct MetricSink {
    registry: Registry,
}

impl MetricSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the current value of `metric` to this scrape.
    pub fn push<C: Collector + Clone + 'static>(&self, metric: &C) -> Result<()> {
        self.registry.register(Box::new(metric.clone()))?;
        Ok(())
    }

    /// Metric families pushed so far, merged by name and sorted.
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }
}

/// Registry with metrics about the exporter process itself.
///
/// Empty when `disabled` is set.
pub fn self_metrics(disabled: bool) -> Result<Registry> {
    let registry = Registry::new();
    if disabled {
        return Ok(registry);
    }

    let build_info = Gauge::with_opts(
        Opts::new(
            "tapo_exporter_build_info",
            "A metric with a constant '1' value labeled by the exporter version",
        )
        .const_label("version", env!("CARGO_PKG_VERSION")),
    )?;
    build_info.set(1.0);
    registry.register(Box::new(build_info))?;

    #[cfg(target_os = "linux")]
    registry.register(Box::new(
        prometheus::process_collector::ProcessCollector::for_self(),
    ))?;

    Ok(registry)
}

/// Encode metric families in Prometheus text format.
pub fn encode(families: &[MetricFamily]) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::with_capacity(8192);

    encoder.encode(families, &mut buffer)?;

    String::from_utf8(buffer).map_err(|e| TapoError::ParseError(e.to_string()))
}
