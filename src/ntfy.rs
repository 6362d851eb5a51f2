use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::co2::WarningLevel;
use crate::config::NotifyConfig;
use crate::models::Reading;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// State carried between invocations so repeated alerts stay rate-limited.
/// Only updated after an alert actually went out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NtfyState {
    #[serde(
        default = "default_level",
        deserialize_with = "level_from_token"
    )]
    pub last_notification_level: WarningLevel,
    #[serde(default = "default_time")]
    pub last_time: DateTime<Utc>,
}

fn default_level() -> WarningLevel {
    WarningLevel::Green
}

fn default_time() -> DateTime<Utc> {
    DateTime::UNIX_EPOCH
}

fn level_from_token<'de, D>(deserializer: D) -> Result<WarningLevel, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error as _;
    let token = String::deserialize(deserializer)?;
    token.parse().map_err(D::Error::custom)
}

impl NtfyState {
    /// The state assumed when no state file exists yet: green, alerted in
    /// the distant past, so any non-green reading alerts immediately.
    fn initial() -> Self {
        Self {
            last_notification_level: WarningLevel::Green,
            last_time: DateTime::<Utc>::MIN_UTC,
        }
    }

    fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::initial()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read state file {}", path.display()));
            }
        };
        serde_json::from_str(&text)
            .with_context(|| format!("state file {} is malformed", path.display()))
    }

    fn store(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string(self)?;
        fs::write(path, text)
            .with_context(|| format!("failed to write state file {}", path.display()))
    }
}

/// Whether a new alert should go out, given what was last alerted and the
/// current level. Red is considered first. A cooldown re-alerts only once
/// it has strictly elapsed; green never alerts.
fn should_alert(
    state: &NtfyState,
    level: WarningLevel,
    now: DateTime<Utc>,
    cfg: &NotifyConfig,
) -> bool {
    match level {
        WarningLevel::Red => {
            state.last_notification_level != WarningLevel::Red
                || state.last_time + chrono::Duration::minutes(i64::from(cfg.red_every)) < now
        }
        WarningLevel::Yellow => {
            state.last_notification_level == WarningLevel::Green
                || state.last_time + chrono::Duration::minutes(i64::from(cfg.yellow_every)) < now
        }
        WarningLevel::Green => false,
    }
}

/// Run the notification pass for one reading: load the persisted state,
/// decide, send at most one alert, and persist (level, now) only after a
/// successful send. Returns whether an alert went out.
pub async fn do_notification(
    cfg: &NotifyConfig,
    level: WarningLevel,
    reading: &Reading,
    now: DateTime<Utc>,
) -> Result<bool> {
    let state = NtfyState::load(&cfg.state_file)?;

    if !should_alert(&state, level, now, cfg) {
        return Ok(false);
    }

    send_alert(cfg, level, reading).await?;

    let new_state = NtfyState {
        last_notification_level: level,
        last_time: now,
    };
    new_state.store(&cfg.state_file)?;

    Ok(true)
}

async fn send_alert(cfg: &NotifyConfig, level: WarningLevel, reading: &Reading) -> Result<()> {
    let priority = match level {
        WarningLevel::Red => cfg.priority_red.as_str(),
        WarningLevel::Yellow | WarningLevel::Green => cfg.priority_yellow.as_str(),
    };

    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?;

    let mut request = client
        .post(format!("{}/{}", cfg.server, cfg.topic))
        .header("Tags", level.ntfy_tag())
        .header("Priority", priority)
        .body(format!("{}: CO2 {} ppm", cfg.room_name, reading.co2));
    if let Some(token) = &cfg.token {
        request = request.header("Authorization", format!("Bearer {}", token));
    }

    request
        .send()
        .await
        .context("failed to send ntfy request")?
        .error_for_status()
        .context("ntfy server rejected the notification")?;

    info!("sent {} notification for {} ppm", level, reading.co2);

    Ok(())
}
