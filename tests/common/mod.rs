//! Fake devices shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tapo_exporter::client::{DeviceConnector, DeviceInfo, DeviceSession, EnergyUsage};
use tapo_exporter::{Result, TapoError};

/// How a fake plug answers every call.
#[derive(Clone)]
pub enum Behaviour {
    Healthy { model: String, milliwatts: i64 },
    Unreachable,
    Slow(Duration),
}

pub struct FakeSession {
    address: String,
    behaviour: Behaviour,
}

#[async_trait]
impl DeviceSession for FakeSession {
    async fn get_device_info(&self) -> Result<DeviceInfo> {
        match &self.behaviour {
            Behaviour::Healthy { model, .. } => Ok(DeviceInfo {
                device_on: true,
                on_time: 60.0,
                overheated: false,
                model: model.clone(),
                avatar: "plug".to_string(),
                nickname: format!("plug {}", self.address),
                ip: self.address.clone(),
                mac: "AA-BB-CC-DD-EE-FF".to_string(),
            }),
            Behaviour::Unreachable => Err(TapoError::ParseError("no route to host".to_string())),
            Behaviour::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Err(TapoError::ParseError("timed out".to_string()))
            }
        }
    }

    async fn get_energy_usage(&self) -> Result<EnergyUsage> {
        match &self.behaviour {
            Behaviour::Healthy { milliwatts, .. } => Ok(EnergyUsage {
                today_runtime: 30,
                today_energy: 120,
                current_power: *milliwatts,
            }),
            _ => Err(TapoError::ParseError("no energy".to_string())),
        }
    }
}

/// Connector handing out fake sessions; addresses without a behaviour fail to connect.
#[derive(Default)]
pub struct FakeConnector {
    behaviours: HashMap<String, Behaviour>,
}

impl FakeConnector {
    pub fn with(mut self, address: &str, behaviour: Behaviour) -> Self {
        self.behaviours.insert(address.to_string(), behaviour);
        self
    }
}

impl DeviceConnector for FakeConnector {
    fn connect(&self, address: &str) -> Result<Box<dyn DeviceSession>> {
        let behaviour = self
            .behaviours
            .get(address)
            .cloned()
            .ok_or_else(|| TapoError::Connect {
                address: address.to_string(),
                reason: "unknown device".to_string(),
            })?;

        Ok(Box::new(FakeSession {
            address: address.to_string(),
            behaviour,
        }))
    }
}

pub fn healthy(model: &str) -> Behaviour {
    Behaviour::Healthy {
        model: model.to_string(),
        milliwatts: 15000,
    }
}

pub fn power_models() -> Vec<String> {
    vec!["P110".to_string()]
}

pub fn addresses(list: &[&str]) -> Vec<String> {
    list.iter().map(|a| a.to_string()).collect()
}

/// Value of the sample named `name` whose labels include `ip="{ip}"`.
pub fn sample(text: &str, name: &str, ip: &str) -> Option<f64> {
    let prefix = format!("{}{{", name);
    let ip_label = format!(r#"ip="{}""#, ip);
    text.lines()
        .filter(|l| l.starts_with(&prefix) && l.contains(&ip_label))
        .find_map(|l| l.rsplit(' ').next().and_then(|v| v.parse().ok()))
}
