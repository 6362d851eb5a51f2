use std::fmt::Write;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use log::info;

use crate::config::InfluxConfig;
use crate::models::SinkRecord;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Write one point to InfluxDB 1.x over its HTTP line-protocol endpoint.
pub async fn write_influx(
    cfg: &InfluxConfig,
    record: &SinkRecord,
    now: DateTime<Utc>,
) -> Result<()> {
    let (database, retention_policy) = split_bucket(&cfg.bucket)?;
    let timestamp_ns = now
        .timestamp_nanos_opt()
        .context("timestamp out of range for influx")?;
    let line = to_line_protocol(&cfg.measurement_name, record, timestamp_ns);

    let client = reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?;

    let mut request = client
        .post(format!("http://{}:{}/write", cfg.host, cfg.port))
        .query(&[("db", database), ("precision", "ns")]);
    if let Some(rp) = retention_policy {
        request = request.query(&[("rp", rp)]);
    }
    if let (Some(username), Some(password)) = (&cfg.username, &cfg.password) {
        request = request.basic_auth(username, Some(password));
    }

    request
        .body(line)
        .send()
        .await
        .with_context(|| format!("failed to write to influx at {}:{}", cfg.host, cfg.port))?
        .error_for_status()
        .context("influx rejected the write")?;

    info!(
        "wrote measurement '{}' to influx database '{}'",
        cfg.measurement_name, database
    );

    Ok(())
}

/// Split the configured bucket into a database and optional retention
/// policy.
fn split_bucket(bucket: &str) -> Result<(&str, Option<&str>)> {
    let parts: Vec<&str> = bucket.split('/').collect();
    match parts.as_slice() {
        [db] => Ok((db, None)),
        [db, rp] => Ok((db, Some(rp))),
        _ => bail!("could not split into db/rp: {}", bucket),
    }
}

fn to_line_protocol(measurement: &str, record: &SinkRecord, timestamp_ns: i64) -> String {
    let mut line = escape_measurement(measurement);
    for (key, value) in [
        ("aranet_name", record.tags.aranet_name.as_str()),
        ("aranet_addr", record.tags.aranet_addr.as_str()),
    ] {
        // empty tag values are invalid in line protocol; skip them
        if value.is_empty() {
            continue;
        }
        let _ = write!(line, ",{}={}", key, escape_tag(value));
    }

    let f = &record.fields;
    let _ = write!(
        line,
        " rssi={}i,temp_c={},temp_f={},humidity_pct={},humidity_abs={},pressure_mbar={},pressure_inHg={},co2_ppm={}i,co2_warning_level=\"{}\" {}",
        f.rssi,
        f.temp_c,
        f.temp_f,
        f.humidity_pct,
        f.humidity_abs,
        f.pressure_mbar,
        f.pressure_in_hg,
        f.co2_ppm,
        escape_string_field(&f.co2_warning_level),
        timestamp_ns,
    );
    line
}

fn escape_measurement(s: &str) -> String {
    s.replace('\\', "\\\\").replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

fn escape_string_field(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::models::{SinkFields, SinkTags};

    fn record() -> SinkRecord {
        SinkRecord {
            tags: SinkTags {
                aranet_name: "Office Aranet".to_string(),
                aranet_addr: "C8:DF:84:01:02:03".to_string(),
            },
            time: "2024-05-01T12:00:00+00:00".to_string(),
            fields: SinkFields {
                rssi: -61,
                temp_c: 21.8,
                temp_f: 71.24,
                humidity_pct: 49.0,
                humidity_abs: 9.42,
                pressure_mbar: 1013.4,
                pressure_in_hg: 29.93,
                co2_ppm: 812,
                co2_warning_level: "green".to_string(),
            },
        }
    }

    #[test]
    fn bucket_splits_into_db_and_rp() {
        assert_eq!(split_bucket("sensors").unwrap(), ("sensors", None));
        assert_eq!(
            split_bucket("sensors/autogen").unwrap(),
            ("sensors", Some("autogen"))
        );
    }

    #[test]
    fn bucket_with_too_many_segments_is_rejected() {
        let err = split_bucket("a/b/c").unwrap_err();
        assert!(err.to_string().contains("could not split into db/rp: a/b/c"));
    }

    #[test]
    fn renders_line_protocol() {
        let line = to_line_protocol("aranet4", &record(), 1714564800000000000);
        assert_eq!(
            line,
            "aranet4,aranet_name=Office\\ Aranet,aranet_addr=C8:DF:84:01:02:03 \
             rssi=-61i,temp_c=21.8,temp_f=71.24,humidity_pct=49,humidity_abs=9.42,\
             pressure_mbar=1013.4,pressure_inHg=29.93,co2_ppm=812i,\
             co2_warning_level=\"green\" 1714564800000000000"
        );
    }

    #[test]
    fn empty_name_tag_is_omitted() {
        let mut record = record();
        record.tags.aranet_name = String::new();
        let line = to_line_protocol("aranet4", &record, 0);
        assert!(line.starts_with("aranet4,aranet_addr="));
    }

    #[test]
    fn escapes_special_characters() {
        assert_eq!(escape_measurement("my measurement"), "my\\ measurement");
        assert_eq!(escape_tag("a=b,c d"), "a\\=b\\,c\\ d");
        assert_eq!(escape_string_field("say \"hi\""), "say \\\"hi\\\"");
    }
}
