//! Device client for talking to Tapo smart plugs.
//!
//! [`DeviceConnector`] and [`DeviceSession`] are the seams the exporter polls
//! through. [`HttpConnector`] is the HTTP/JSON implementation used by the
//! binary.

use crate::config::TapoConfig;
use crate::error::{Result, TapoError};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Opens sessions to devices. Holds the credentials and timeout shared by all
/// of them.
pub trait DeviceConnector {
    /// Build a session handle for one device address.
    ///
    /// This must not need the device to be reachable; it only fails when the
    /// handle itself cannot be constructed.
    fn connect(&self, address: &str) -> Result<Box<dyn DeviceSession>>;
}

/// A handle for reading one device.
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Current on/off, runtime and identity information.
    async fn get_device_info(&self) -> Result<DeviceInfo>;

    /// Today's runtime and energy counters plus the current draw.
    /// Only meaningful for power-capable models.
    async fn get_energy_usage(&self) -> Result<EnergyUsage>;
}

/// Device information reported by a plug.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceInfo {
    /// Relay state
    pub device_on: bool,
    /// Time since the relay was switched on
    pub on_time: f64,
    /// Overheat protection tripped
    #[serde(default)]
    pub overheated: bool,
    /// Hardware model (e.g., "P110")
    pub model: String,
    /// Icon chosen in the app (e.g., "plug", "fan")
    #[serde(default)]
    pub avatar: String,
    /// User-assigned name
    #[serde(default)]
    pub nickname: String,
    /// Address the device reports for itself
    #[serde(default)]
    pub ip: String,
    /// MAC address
    #[serde(default)]
    pub mac: String,
}

/// Energy usage reported by power-capable plugs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnergyUsage {
    /// Minutes switched on today
    pub today_runtime: i64,
    /// Watt-hours used today
    pub today_energy: i64,
    /// Current draw in milliwatts
    pub current_power: i64,
}

/// Connector that talks to devices over HTTP.
#[derive(Clone)]
pub struct HttpConnector {
    client: Client,
    username: String,
    password: String,
}

impl HttpConnector {
    /// Create a connector from the device configuration.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tapo_exporter::client::{DeviceConnector, HttpConnector};
    /// use tapo_exporter::config::Settings;
    ///
    /// let settings = Settings::load(Some("config/default.toml")).unwrap();
    /// let connector = HttpConnector::new(&settings.tapo).unwrap();
    /// let session = connector.connect("192.168.1.20").unwrap();
    /// ```
    pub fn new(config: &TapoConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }
}

impl DeviceConnector for HttpConnector {
    fn connect(&self, address: &str) -> Result<Box<dyn DeviceSession>> {
        let base = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };
        let endpoint = Url::parse(&base)
            .and_then(|url| url.join("/app"))
            .map_err(|e| TapoError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            endpoint,
            username: self.username.clone(),
            password: self.password.clone(),
            token: Mutex::new(None),
        }))
    }
}

/// Session with a single device.
pub struct HttpSession {
    client: Client,
    endpoint: Url,
    username: String,
    password: String,
    token: Mutex<Option<String>>,
}

impl HttpSession {
    async fn login(&self) -> Result<String> {
        let params = LoginParams {
            username: &self.username,
            password: &self.password,
        };
        let login: LoginResult = self
            .call(self.endpoint.clone(), "login_device", Some(params))
            .await?;
        Ok(login.token)
    }

    /// Run `method` with the session token, logging in first if needed.
    async fn request<T: DeserializeOwned>(&self, method: &str) -> Result<T> {
        let mut token = self.token.lock().await;

        let current = match token.take() {
            Some(t) => t,
            None => self.login().await?,
        };

        let result = self.call_with_token(&current, method).await;
        // Expired tokens look like any other failure; keep it only while it works.
        if result.is_ok() {
            *token = Some(current);
        }
        result
    }

    async fn call_with_token<T: DeserializeOwned>(&self, token: &str, method: &str) -> Result<T> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("token", token);
        self.call::<T, ()>(url, method, None).await
    }

    async fn call<T: DeserializeOwned, P: Serialize>(
        &self,
        url: Url,
        method: &str,
        params: Option<P>,
    ) -> Result<T> {
        debug!("Calling {} on {}", method, self.endpoint);

        let response = self
            .client
            .post(url)
            .json(&Request { method, params })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("{} failed on {}: {}", method, self.endpoint, status);
            // error_for_status only covers 4xx and 5xx.
            return Err(match response.error_for_status() {
                Err(e) => TapoError::Api(e),
                Ok(_) => TapoError::UnexpectedStatus {
                    method: method.to_string(),
                    status: status.as_u16(),
                },
            });
        }

        let body = response.text().await?;
        let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
            TapoError::ParseError(format!(
                "{} response: {}. Body preview: {}",
                method,
                e,
                body.chars().take(200).collect::<String>()
            ))
        })?;

        if envelope.error_code != 0 {
            return Err(TapoError::Device {
                method: method.to_string(),
                code: envelope.error_code,
            });
        }

        envelope
            .result
            .ok_or_else(|| TapoError::ParseError(format!("{} response has no result", method)))
    }
}

#[async_trait]
impl DeviceSession for HttpSession {
    async fn get_device_info(&self) -> Result<DeviceInfo> {
        self.request("get_device_info").await
    }

    async fn get_energy_usage(&self) -> Result<EnergyUsage> {
        self.request("get_energy_usage").await
    }
}

#[derive(Serialize)]
struct Request<'a, P> {
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<P>,
}

#[derive(Serialize)]
struct LoginParams<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResult {
    token: String,
}

/// Response wrapper shared by every device method.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    error_code: i64,
    result: Option<T>,
}
