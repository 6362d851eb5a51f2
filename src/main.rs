mod ble;
mod co2;
mod config;
mod conv;
mod influx;
mod models;
mod mqtt;
mod ntfy;

use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use env_logger::Builder;
use log::{LevelFilter, error, info, warn};

use ble::Aranet4;
use co2::WarningLevel;
use config::Config;
use models::{Reading, SinkRecord};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "an4mon")]
#[command(about = "Monitor an Aranet4 CO2 sensor and forward its readings")]
struct Args {
    /// JSON configuration file to run
    #[arg(short, long)]
    config: Option<String>,

    /// Scan for Aranet4 devices and exit
    #[arg(short, long)]
    scan: bool,

    /// Print the reading to stdout
    #[arg(short, long)]
    print: bool,
}

fn init_logging() {
    Builder::new()
        .format(|buf, record| {
            writeln!(buf, "{}: {}: {}", buf.timestamp(), record.level(), record.args())
        })
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    let result = match (&args.config, args.scan) {
        (Some(_), true) => {
            eprintln!("--scan and --config are mutually exclusive");
            return ExitCode::from(1);
        }
        (None, false) => {
            eprintln!("either --scan or --config is required");
            return ExitCode::from(1);
        }
        (None, true) => run_scan().await,
        (Some(path), false) => run_monitor(path, args.print).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run_scan() -> Result<ExitCode> {
    for device in ble::scan_aranets().await? {
        println!("{} ({} dBm)", device.name, device.rssi);
        println!("\t{}", device.address);
        println!();
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_monitor(config_path: &str, print: bool) -> Result<ExitCode> {
    let cfg = Config::load(config::expand_tilde(config_path))?;

    if cfg.influx.is_none() && cfg.notify.is_none() && !print {
        eprintln!(
            "config's 'influx' and 'notify' keys are both false, and --print was not given; nothing to do!"
        );
        return Ok(ExitCode::from(1));
    }

    // Captured before the read so every sink sees the same instant.
    let now = Utc::now();

    let reading = read_sensor(&cfg.aranet_device_address)
        .await
        .with_context(|| format!("failed reading from {}", cfg.aranet_device_address))?;
    let level = WarningLevel::from_ppm(reading.co2, cfg.co2_yellow, cfg.co2_red);

    if print {
        print_reading(&reading, level);
    }

    if let Some(notify_cfg) = &cfg.notify {
        if let Err(e) = ntfy::do_notification(notify_cfg, level, &reading, now).await {
            error!("notification failed: {e:#}");
        }
    }

    let record = SinkRecord::new(&cfg, &reading, level, now);
    let mut healthy = true;

    if let Some(influx_cfg) = &cfg.influx {
        if let Err(e) = influx::write_influx(influx_cfg, &record, now).await {
            error!("influx write failed: {e:#}");
            healthy = false;
        }
    }

    if let Some(mqtt_cfg) = &cfg.mqtt {
        if let Err(e) = mqtt::write_mqtt(mqtt_cfg, &record).await {
            error!("mqtt publish failed: {e:#}");
        }
    }

    if healthy && let Some(url) = &cfg.healthcheck_ping_url {
        match ping_healthcheck(url).await {
            Ok(()) => info!("pinged {url}"),
            Err(e) => warn!("healthcheck ping failed: {e:#}"),
        }
    }

    Ok(ExitCode::SUCCESS)
}

async fn read_sensor(address: &str) -> Result<Reading> {
    let device = Aranet4::connect(address).await?;
    let reading = device.read().await?;
    device.disconnect().await?;
    Ok(reading)
}

fn print_reading(reading: &Reading, level: WarningLevel) {
    println!("{} ({} dBm)", reading.name, reading.rssi);
    println!("co2: {} ppm {}", reading.co2, level.emoji());
    println!(
        "temperature: {:.1} °C ({:.1} °F)",
        reading.temperature,
        conv::celsius_to_fahrenheit(reading.temperature)
    );
    println!(
        "pressure: {:.1} mbar ({:.2} inHg)",
        reading.pressure,
        conv::mbar_to_inhg(reading.pressure)
    );
    println!("humidity: {:.0} %", reading.humidity);
}

async fn ping_healthcheck(url: &str) -> Result<()> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()?
        .get(url)
        .send()
        .await?;
    Ok(())
}
