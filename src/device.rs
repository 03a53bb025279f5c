//! Live metric state for a single plug.
//!
//! A [`Device`] is refreshed and collected once per scrape. Both take the
//! device's lock, so a collect running alongside a refresh waits for the
//! refresh to finish and never sees a half-updated [`MetricSet`].

use crate::client::DeviceSession;
use crate::error::Result;
use crate::metrics::{self, bool_to_f64, MetricSet, MetricSink};
use prometheus::core::Desc;
use prometheus::{Counter, Gauge};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Metric schema of a device. Fixed at the first successful reading.
pub enum Schema {
    Uninitialised,
    Initialised(MetricSet),
}

struct DeviceState {
    schema: Schema,
    last_was_valid: bool,
}

/// One configured plug.
pub struct Device {
    address: String,
    session: Box<dyn DeviceSession>,
    power_models: Arc<[String]>,
    up: Gauge,
    errors: Counter,
    state: Mutex<DeviceState>,
}

impl Device {
    pub fn new(
        address: &str,
        session: Box<dyn DeviceSession>,
        power_models: Arc<[String]>,
    ) -> Result<Self> {
        Ok(Self {
            address: address.to_string(),
            session,
            power_models,
            up: metrics::up_gauge(address)?,
            errors: metrics::errors_counter(address)?,
            state: Mutex::new(DeviceState {
                schema: Schema::Uninitialised,
                last_was_valid: false,
            }),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the metric schema has been discovered.
    pub async fn is_initialised(&self) -> bool {
        matches!(self.state.lock().await.schema, Schema::Initialised(_))
    }

    /// Whether the device was found to report energy usage.
    /// `None` until the first successful reading.
    pub async fn supports_power(&self) -> Option<bool> {
        match &self.state.lock().await.schema {
            Schema::Uninitialised => None,
            Schema::Initialised(set) => Some(set.supports_power()),
        }
    }

    /// Read the device and update its metrics.
    pub async fn refresh(&self) {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await;
    }

    /// Emit this device's metrics into `sink`.
    pub async fn collect(&self, sink: &MetricSink) -> Result<()> {
        let state = self.state.lock().await;
        self.collect_locked(&state, sink)
    }

    /// Refresh and then collect without letting go of the lock in between.
    pub async fn scrape(&self, sink: &MetricSink) -> Result<()> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await;
        self.collect_locked(&state, sink)
    }

    /// Descriptors of every metric that currently exists.
    pub async fn describe(&self) -> Vec<Desc> {
        let state = self.state.lock().await;

        let mut descs = metrics::descs(&self.up);
        descs.extend(metrics::descs(&self.errors));
        if let Schema::Initialised(set) = &state.schema {
            for gauge in set.gauges() {
                descs.extend(metrics::descs(gauge));
            }
        }
        descs
    }

    async fn refresh_locked(&self, state: &mut DeviceState) {
        let start = Instant::now();

        let info = match self.session.get_device_info().await {
            Ok(info) => {
                debug!(
                    device = %self.address,
                    on = info.device_on,
                    time = start.elapsed().as_secs_f64(),
                    "refreshed device"
                );
                info
            }
            Err(e) => {
                warn!(
                    device = %self.address,
                    err = %e,
                    time = start.elapsed().as_secs_f64(),
                    "failed to read device"
                );
                state.last_was_valid = false;
                self.up.set(0.0);
                self.errors.inc();
                return;
            }
        };

        state.last_was_valid = true;
        self.up.set(1.0);

        if let Schema::Uninitialised = state.schema {
            match MetricSet::discover(&info, &self.power_models) {
                Ok(set) => state.schema = Schema::Initialised(set),
                Err(e) => {
                    // Label values straight from the device; try again next cycle.
                    warn!(device = %self.address, err = %e, "cannot build device metrics");
                    return;
                }
            }
        }

        let Schema::Initialised(set) = &state.schema else {
            return;
        };

        set.on.set(bool_to_f64(info.device_on));
        set.on_time.set(info.on_time);
        set.overheated.set(bool_to_f64(info.overheated));

        if let Some(power) = &set.power {
            match self.session.get_energy_usage().await {
                Ok(energy) => {
                    power.today_runtime.set(energy.today_runtime as f64);
                    power.today_energy.set(energy.today_energy as f64);
                    power.current_power.set(energy.current_power as f64 / 1000.0);
                }
                Err(e) => {
                    debug!(device = %self.address, err = %e, "energy usage unavailable");
                }
            }
        }
    }

    fn collect_locked(&self, state: &DeviceState, sink: &MetricSink) -> Result<()> {
        sink.push(&self.up)?;
        sink.push(&self.errors)?;

        if !state.last_was_valid {
            return Ok(());
        }
        if let Schema::Initialised(set) = &state.schema {
            for gauge in set.gauges() {
                sink.push(gauge)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DeviceInfo, EnergyUsage};
    use crate::error::TapoError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Session that replays scripted answers; an empty script means failure.
    #[derive(Default)]
    struct ScriptedSession {
        infos: StdMutex<VecDeque<Option<DeviceInfo>>>,
        energy: StdMutex<VecDeque<Option<EnergyUsage>>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedSession {
        fn with_infos(infos: Vec<Option<DeviceInfo>>) -> Self {
            Self {
                infos: StdMutex::new(infos.into()),
                ..Default::default()
            }
        }

        fn energy(self, energy: Vec<Option<EnergyUsage>>) -> Self {
            *self.energy.lock().unwrap() = energy.into();
            self
        }
    }

    fn unreachable() -> TapoError {
        TapoError::ParseError("unreachable".to_string())
    }

    #[async_trait]
    impl DeviceSession for ScriptedSession {
        async fn get_device_info(&self) -> Result<DeviceInfo> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let next = self.infos.lock().unwrap().pop_front().flatten();
            next.ok_or_else(unreachable)
        }

        async fn get_energy_usage(&self) -> Result<EnergyUsage> {
            let next = self.energy.lock().unwrap().pop_front().flatten();
            next.ok_or_else(unreachable)
        }
    }

    fn reading(model: &str, on: bool) -> Option<DeviceInfo> {
        Some(DeviceInfo {
            device_on: on,
            on_time: 3600.0,
            overheated: false,
            model: model.to_string(),
            avatar: "plug".to_string(),
            nickname: "Kettle".to_string(),
            ip: "192.168.1.20".to_string(),
            mac: "AA-BB-CC-DD-EE-FF".to_string(),
        })
    }

    fn energy(milliwatts: i64) -> Option<EnergyUsage> {
        Some(EnergyUsage {
            today_runtime: 42,
            today_energy: 310,
            current_power: milliwatts,
        })
    }

    fn device(session: ScriptedSession) -> Device {
        Device::new(
            "192.168.1.20",
            Box::new(session),
            Arc::from(vec!["P110".to_string()]),
        )
        .unwrap()
    }

    async fn scrape_text(device: &Device) -> String {
        let sink = MetricSink::new();
        device.scrape(&sink).await.unwrap();
        metrics::encode(&sink.gather()).unwrap()
    }

    /// Value of the first sample whose line starts with `name` followed by a label set.
    fn sample(text: &str, name: &str) -> Option<f64> {
        let prefix = format!("{}{{", name);
        text.lines()
            .find(|l| l.starts_with(&prefix))
            .and_then(|l| l.rsplit(' ').next())
            .and_then(|v| v.parse().ok())
    }

    #[tokio::test]
    async fn test_failed_refresh_reports_only_up_and_errors() {
        let device = device(ScriptedSession::with_infos(vec![None]));

        let text = scrape_text(&device).await;

        assert_eq!(sample(&text, "tapo_device_up"), Some(0.0));
        assert_eq!(sample(&text, "tapo_device_errors"), Some(1.0));
        assert!(!text.contains("tapo_device_on{"));
        assert!(!device.is_initialised().await);
        assert_eq!(device.describe().await.len(), 2);
    }

    #[tokio::test]
    async fn test_successful_refresh_reports_reading() {
        let device = device(ScriptedSession::with_infos(vec![reading("P100", true)]));

        let text = scrape_text(&device).await;

        assert_eq!(sample(&text, "tapo_device_up"), Some(1.0));
        assert_eq!(sample(&text, "tapo_device_errors"), Some(0.0));
        assert_eq!(sample(&text, "tapo_device_on"), Some(1.0));
        assert_eq!(sample(&text, "tapo_device_onTime"), Some(3600.0));
        assert_eq!(sample(&text, "tapo_device_overheated"), Some(0.0));
        assert!(text.contains(r#"model="P100""#));
        assert!(text.contains(r#"name="Kettle""#));
        assert!(text.contains(r#"type="plug""#));
        assert!(!text.contains("tapo_device_power"));
        assert_eq!(device.supports_power().await, Some(false));
    }

    #[tokio::test]
    async fn test_power_metrics_convert_milliwatts() {
        let session = ScriptedSession::with_infos(vec![reading("p110", true)])
            .energy(vec![energy(15000)]);
        let device = device(session);

        let text = scrape_text(&device).await;

        assert_eq!(sample(&text, "tapo_device_power"), Some(15.0));
        assert_eq!(sample(&text, "tapo_device_today_runtime"), Some(42.0));
        assert_eq!(sample(&text, "tapo_device_today_energy"), Some(310.0));
        assert_eq!(device.describe().await.len(), 8);
    }

    #[tokio::test]
    async fn test_energy_failure_keeps_device_up_and_previous_values() {
        let session =
            ScriptedSession::with_infos(vec![reading("P110", true), reading("P110", false)])
                .energy(vec![energy(15000), None]);
        let device = device(session);

        scrape_text(&device).await;
        let text = scrape_text(&device).await;

        assert_eq!(sample(&text, "tapo_device_up"), Some(1.0));
        assert_eq!(sample(&text, "tapo_device_errors"), Some(0.0));
        assert_eq!(sample(&text, "tapo_device_on"), Some(0.0));
        assert_eq!(sample(&text, "tapo_device_power"), Some(15.0));
    }

    #[tokio::test]
    async fn test_failure_after_success_hides_stale_gauges() {
        let device = device(ScriptedSession::with_infos(vec![
            reading("P100", true),
            None,
        ]));

        let first = scrape_text(&device).await;
        assert!(first.contains("tapo_device_on{"));

        let second = scrape_text(&device).await;
        assert_eq!(sample(&second, "tapo_device_up"), Some(0.0));
        assert_eq!(sample(&second, "tapo_device_errors"), Some(1.0));
        assert!(!second.contains("tapo_device_on{"));
        assert!(!second.contains("tapo_device_onTime{"));
        // Schema survives the failure.
        assert!(device.is_initialised().await);
    }

    #[tokio::test]
    async fn test_schema_is_pinned_at_first_success() {
        let device = device(ScriptedSession::with_infos(vec![
            reading("P100", true),
            reading("P110", true),
        ]));

        scrape_text(&device).await;
        let before = device.describe().await;
        let text = scrape_text(&device).await;
        let after = device.describe().await;

        assert_eq!(device.supports_power().await, Some(false));
        assert!(text.contains(r#"model="P100""#));
        assert!(!text.contains(r#"model="P110""#));
        assert!(!text.contains("tapo_device_power"));
        let ids = |d: &[Desc]| d.iter().map(|d| d.id).collect::<Vec<_>>();
        assert_eq!(ids(&before), ids(&after));
    }

    #[tokio::test]
    async fn test_collect_waits_for_refresh_in_flight() {
        let gate = Arc::new(Notify::new());
        let session = ScriptedSession {
            gate: Some(gate.clone()),
            ..ScriptedSession::with_infos(vec![reading("P100", true)])
        };
        let device = Arc::new(device(session));

        let refreshing = {
            let device = device.clone();
            tokio::spawn(async move { device.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let sink = MetricSink::new();
        let blocked = tokio::time::timeout(Duration::from_millis(50), device.collect(&sink)).await;
        assert!(blocked.is_err(), "collect ran while refresh held the lock");

        gate.notify_one();
        refreshing.await.unwrap();

        let sink = MetricSink::new();
        device.collect(&sink).await.unwrap();
        let text = metrics::encode(&sink.gather()).unwrap();
        assert_eq!(sample(&text, "tapo_device_up"), Some(1.0));
        assert_eq!(sample(&text, "tapo_device_on"), Some(1.0));
    }
}
