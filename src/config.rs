use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

/// Priority tokens the ntfy server accepts.
const NTFY_PRIORITIES: [&str; 11] = [
    "1", "min", "2", "low", "3", "default", "4", "high", "5", "max", "urgent",
];

/// The configuration file as written: one flat JSON object, with the
/// per-sink settings only meaningful when that sink's toggle is on.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    aranet_device_address: String,
    #[serde(default)]
    notify: bool,
    #[serde(default)]
    influx: bool,
    #[serde(default)]
    mqtt: bool,
    healthcheck_ping_url: Option<String>,
    #[serde(default = "default_co2_yellow")]
    co2_yellow: u16,
    #[serde(default = "default_co2_red")]
    co2_red: u16,
    #[serde(default = "default_ntfy_server")]
    ntfy_server: String,
    ntfy_token: Option<String>,
    ntfy_topic: Option<String>,
    notify_room_name: Option<String>,
    #[serde(default = "default_notify_yellow_every")]
    notify_yellow_every: u32,
    #[serde(default = "default_notify_red_every")]
    notify_red_every: u32,
    #[serde(default = "default_ntfy_priority_yellow")]
    ntfy_priority_yellow: String,
    #[serde(default = "default_ntfy_priority_red")]
    ntfy_priority_red: String,
    state_file: Option<String>,
    influx_bucket: Option<String>,
    influx_host: Option<String>,
    #[serde(default = "default_influx_port")]
    influx_port: u16,
    influx_username: Option<String>,
    influx_password: Option<String>,
    influx_measurement_name: Option<String>,
    #[serde(default)]
    influx_nametag: String,
    mqtt_broker: Option<String>,
    #[serde(default = "default_mqtt_port")]
    mqtt_port: u16,
    mqtt_topic: Option<String>,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
}

fn default_co2_yellow() -> u16 {
    1000
}

fn default_co2_red() -> u16 {
    1400
}

fn default_ntfy_server() -> String {
    "https://ntfy.sh".to_string()
}

fn default_notify_yellow_every() -> u32 {
    30
}

fn default_notify_red_every() -> u32 {
    5
}

fn default_ntfy_priority_yellow() -> String {
    "3".to_string()
}

fn default_ntfy_priority_red() -> String {
    "5".to_string()
}

fn default_influx_port() -> u16 {
    8086
}

fn default_mqtt_port() -> u16 {
    1883
}

/// Validated configuration. A sink's settings are only present when that
/// sink is enabled, so downstream code cannot touch half-configured ones.
#[derive(Debug, Clone)]
pub struct Config {
    pub aranet_device_address: String,
    pub co2_yellow: u16,
    pub co2_red: u16,
    pub healthcheck_ping_url: Option<String>,
    pub notify: Option<NotifyConfig>,
    pub influx: Option<InfluxConfig>,
    pub mqtt: Option<MqttConfig>,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub server: String,
    pub token: Option<String>,
    pub topic: String,
    pub room_name: String,
    /// Minutes between repeated yellow alerts.
    pub yellow_every: u32,
    /// Minutes between repeated red alerts.
    pub red_every: u32,
    pub priority_yellow: String,
    pub priority_red: String,
    pub state_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub host: String,
    pub port: u16,
    /// Either a database name or "database/retention_policy".
    pub bucket: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub measurement_name: String,
    pub nametag: String,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.as_ref().display()))?;
        Self::from_json(&text)
    }

    fn from_json(text: &str) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(text).context("failed to parse config file")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        if raw.aranet_device_address.is_empty() {
            bail!("aranet_device_address is required");
        }

        let notify = validate_notify(&raw)?;
        let influx = validate_influx(&raw)?;
        let mqtt = validate_mqtt(&raw)?;

        Ok(Config {
            aranet_device_address: raw.aranet_device_address,
            co2_yellow: raw.co2_yellow,
            co2_red: raw.co2_red,
            healthcheck_ping_url: non_empty(&raw.healthcheck_ping_url),
            notify,
            influx,
            mqtt,
        })
    }
}

fn validate_notify(raw: &RawConfig) -> Result<Option<NotifyConfig>> {
    if !raw.notify {
        return Ok(None);
    }

    let Some(topic) = non_empty(&raw.ntfy_topic) else {
        bail!("ntfy_topic is required");
    };
    let Some(state_file) = non_empty(&raw.state_file) else {
        bail!("state_file is required for notification support");
    };
    if !NTFY_PRIORITIES.contains(&raw.ntfy_priority_red.as_str()) {
        bail!("ntfy_priority_red must be one of {:?}", NTFY_PRIORITIES);
    }
    if !NTFY_PRIORITIES.contains(&raw.ntfy_priority_yellow.as_str()) {
        bail!("ntfy_priority_yellow must be one of {:?}", NTFY_PRIORITIES);
    }
    let Some(room_name) = non_empty(&raw.notify_room_name) else {
        bail!("notify_room_name is required");
    };
    let server_lower = raw.ntfy_server.to_lowercase();
    if !server_lower.starts_with("http://") && !server_lower.starts_with("https://") {
        bail!("ntfy_server must start with http:// or https://");
    }
    let server = raw
        .ntfy_server
        .strip_suffix('/')
        .unwrap_or(&raw.ntfy_server)
        .to_string();

    Ok(Some(NotifyConfig {
        server,
        token: non_empty(&raw.ntfy_token),
        topic,
        room_name,
        yellow_every: raw.notify_yellow_every,
        red_every: raw.notify_red_every,
        priority_yellow: raw.ntfy_priority_yellow.clone(),
        priority_red: raw.ntfy_priority_red.clone(),
        state_file: expand_tilde(&state_file),
    }))
}

fn validate_influx(raw: &RawConfig) -> Result<Option<InfluxConfig>> {
    if !raw.influx {
        return Ok(None);
    }

    let Some(bucket) = non_empty(&raw.influx_bucket) else {
        bail!("influx_bucket is required");
    };
    let Some(host) = non_empty(&raw.influx_host) else {
        bail!("influx_host is required");
    };
    let username = non_empty(&raw.influx_username);
    let password = non_empty(&raw.influx_password);
    if username.is_some() != password.is_some() {
        bail!("influx_username and influx_password must be given together");
    }
    let Some(measurement_name) = non_empty(&raw.influx_measurement_name) else {
        bail!("influx_measurement_name is required");
    };

    Ok(Some(InfluxConfig {
        host,
        port: raw.influx_port,
        bucket,
        username,
        password,
        measurement_name,
        nametag: raw.influx_nametag.clone(),
    }))
}

fn validate_mqtt(raw: &RawConfig) -> Result<Option<MqttConfig>> {
    if !raw.mqtt {
        return Ok(None);
    }

    let Some(broker) = non_empty(&raw.mqtt_broker) else {
        bail!("mqtt_broker is required");
    };
    let Some(topic) = non_empty(&raw.mqtt_topic) else {
        bail!("mqtt_topic is required");
    };
    let username = non_empty(&raw.mqtt_username);
    let password = non_empty(&raw.mqtt_password);
    if username.is_some() != password.is_some() {
        bail!("mqtt_username and mqtt_password must be given together");
    }

    Ok(Some(MqttConfig {
        broker,
        port: raw.mqtt_port,
        topic,
        username,
        password,
    }))
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|s| !s.is_empty()).map(str::to_string)
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Some(home) = home::home_dir()
    {
        home.join(stripped)
    } else {
        PathBuf::from(path)
    }
}
