use std::fmt;
use std::str::FromStr;

use anyhow::{Error, bail};
use serde::Serialize;

/// CO2 severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    Green,
    Yellow,
    Red,
}

impl WarningLevel {
    /// Classify a CO2 reading against the configured thresholds. A reading
    /// exactly on a boundary gets the more severe level.
    pub fn from_ppm(ppm: u16, co2_yellow: u16, co2_red: u16) -> Self {
        if ppm < co2_yellow {
            WarningLevel::Green
        } else if ppm < co2_red {
            WarningLevel::Yellow
        } else {
            WarningLevel::Red
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WarningLevel::Green => "green",
            WarningLevel::Yellow => "yellow",
            WarningLevel::Red => "red",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            WarningLevel::Green => "🟢",
            WarningLevel::Yellow => "🟡",
            WarningLevel::Red => "🔴",
        }
    }

    /// Display tag attached to alerts. Green and yellow share one.
    pub fn ntfy_tag(&self) -> &'static str {
        match self {
            WarningLevel::Green | WarningLevel::Yellow => "yellow_circle",
            WarningLevel::Red => "red_circle",
        }
    }
}

impl fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WarningLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "green" => Ok(WarningLevel::Green),
            "yellow" => Ok(WarningLevel::Yellow),
            "red" => Ok(WarningLevel::Red),
            _ => bail!("unknown warning level: {}", s),
        }
    }
}
