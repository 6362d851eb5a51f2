use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::co2::WarningLevel;
use crate::config::Config;
use crate::conv;

/// A device seen while scanning.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub name: String,
    pub address: String,
    pub rssi: i16,
}

/// One sample from the sensor plus the identity of the device it came from.
#[derive(Debug, Clone)]
pub struct Reading {
    pub name: String,
    pub address: String,
    pub rssi: i16,
    pub co2: u16,
    pub temperature: f64,
    pub pressure: f64,
    pub humidity: f64,
}

impl Reading {
    /// Parse the current-readings characteristic. Layout, little-endian:
    /// CO2 ppm (u16), temperature in 0.05 C units (u16), pressure in
    /// 0.1 mbar units (u16), relative humidity percent (u8).
    pub fn from_bytes(device: &DiscoveredDevice, data: &[u8]) -> Option<Self> {
        if data.len() < 7 {
            return None;
        }

        let co2 = u16::from_le_bytes([data[0], data[1]]);
        let temp_raw = u16::from_le_bytes([data[2], data[3]]);
        let pressure_raw = u16::from_le_bytes([data[4], data[5]]);
        let humidity = data[6];

        Some(Self {
            name: device.name.clone(),
            address: device.address.clone(),
            rssi: device.rssi,
            co2,
            temperature: round1(temp_raw as f64 * 0.05),
            pressure: round1(pressure_raw as f64 * 0.1),
            humidity: humidity as f64,
        })
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// The record both forwarding sinks consume; influx flattens it into line
/// protocol, MQTT publishes it serialized as-is.
#[derive(Debug, Serialize)]
pub struct SinkRecord {
    pub tags: SinkTags,
    pub time: String,
    pub fields: SinkFields,
}

#[derive(Debug, Serialize)]
pub struct SinkTags {
    pub aranet_name: String,
    pub aranet_addr: String,
}

#[derive(Debug, Serialize)]
pub struct SinkFields {
    pub rssi: i64,
    pub temp_c: f64,
    pub temp_f: f64,
    pub humidity_pct: f64,
    pub humidity_abs: f64,
    pub pressure_mbar: f64,
    #[serde(rename = "pressure_inHg")]
    pub pressure_in_hg: f64,
    pub co2_ppm: i64,
    pub co2_warning_level: String,
}

impl SinkRecord {
    pub fn new(cfg: &Config, reading: &Reading, level: WarningLevel, now: DateTime<Utc>) -> Self {
        let nametag = cfg
            .influx
            .as_ref()
            .map(|influx| influx.nametag.clone())
            .unwrap_or_default();

        Self {
            tags: SinkTags {
                aranet_name: nametag,
                aranet_addr: cfg.aranet_device_address.clone(),
            },
            time: now.to_rfc3339(),
            fields: SinkFields {
                rssi: i64::from(reading.rssi),
                temp_c: reading.temperature,
                temp_f: conv::celsius_to_fahrenheit(reading.temperature),
                humidity_pct: reading.humidity,
                humidity_abs: conv::absolute_humidity_g_m3(reading.temperature, reading.humidity),
                pressure_mbar: reading.pressure,
                pressure_in_hg: conv::mbar_to_inhg(reading.pressure),
                co2_ppm: i64::from(reading.co2),
                co2_warning_level: level.as_str().to_string(),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn device() -> DiscoveredDevice {
        DiscoveredDevice {
            name: "Aranet4 01234".to_string(),
            address: "C8:DF:84:01:02:03".to_string(),
            rssi: -61,
        }
    }

    fn bare_config() -> Config {
        Config {
            aranet_device_address: "C8:DF:84:01:02:03".to_string(),
            co2_yellow: 1000,
            co2_red: 1400,
            healthcheck_ping_url: None,
            notify: None,
            influx: None,
            mqtt: None,
        }
    }

    #[test]
    fn parses_current_readings() {
        // co2 800 ppm, temp 436 * 0.05 = 21.8 C, pressure 10134 * 0.1 =
        // 1013.4 mbar, humidity 49 %
        let data = [0x20, 0x03, 0xB4, 0x01, 0x96, 0x27, 0x31];
        let reading = Reading::from_bytes(&device(), &data).unwrap();
        assert_eq!(reading.co2, 800);
        assert_eq!(reading.temperature, 21.8);
        assert_eq!(reading.pressure, 1013.4);
        assert_eq!(reading.humidity, 49.0);
        assert_eq!(reading.rssi, -61);
        assert_eq!(reading.name, "Aranet4 01234");
    }

    #[test]
    fn rejects_short_payloads() {
        assert!(Reading::from_bytes(&device(), &[0x20, 0x03, 0xB4]).is_none());
        assert!(Reading::from_bytes(&device(), &[]).is_none());
    }

    #[test]
    fn tolerates_trailing_bytes() {
        let data = [0x20, 0x03, 0xB4, 0x01, 0x96, 0x27, 0x31, 0xFF, 0xFF, 0xFF];
        assert!(Reading::from_bytes(&device(), &data).is_some());
    }

    #[test]
    fn sink_record_fields() {
        let data = [0x20, 0x03, 0xB4, 0x01, 0x96, 0x27, 0x31];
        let reading = Reading::from_bytes(&device(), &data).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let record = SinkRecord::new(&bare_config(), &reading, WarningLevel::Green, now);
        assert_eq!(record.tags.aranet_addr, "C8:DF:84:01:02:03");
        assert_eq!(record.tags.aranet_name, "");
        assert_eq!(record.time, "2024-05-01T12:00:00+00:00");
        assert_eq!(record.fields.co2_ppm, 800);
        assert_eq!(record.fields.rssi, -61);
        assert_eq!(record.fields.temp_c, 21.8);
        assert!((record.fields.temp_f - 71.24).abs() < 1e-9);
        assert_eq!(record.fields.co2_warning_level, "green");
    }

    #[test]
    fn sink_record_serializes_with_influx_field_names() {
        let data = [0x20, 0x03, 0xB4, 0x01, 0x96, 0x27, 0x31];
        let reading = Reading::from_bytes(&device(), &data).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let record = SinkRecord::new(&bare_config(), &reading, WarningLevel::Yellow, now);
        let value = serde_json::to_value(&record).unwrap();
        assert!(value["fields"]["pressure_inHg"].is_number());
        assert!(value["fields"]["co2_ppm"].is_i64());
        assert_eq!(value["fields"]["co2_warning_level"], "yellow");
        assert_eq!(value["tags"]["aranet_addr"], "C8:DF:84:01:02:03");
        assert_eq!(value["time"], "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn sink_record_uses_influx_nametag_when_present() {
        let mut cfg = bare_config();
        cfg.influx = Some(crate::config::InfluxConfig {
            host: "db.local".to_string(),
            port: 8086,
            bucket: "sensors".to_string(),
            username: None,
            password: None,
            measurement_name: "aranet4".to_string(),
            nametag: "office".to_string(),
        });

        let data = [0x20, 0x03, 0xB4, 0x01, 0x96, 0x27, 0x31];
        let reading = Reading::from_bytes(&device(), &data).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let record = SinkRecord::new(&cfg, &reading, WarningLevel::Green, now);
        assert_eq!(record.tags.aranet_name, "office");
    }
}
