use std::cmp::Reverse;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time::sleep;
use uuid::Uuid;

use crate::models::{DiscoveredDevice, Reading};

const ARANET4_SERVICE: Uuid = Uuid::from_u128(0x0000FCE0_0000_1000_8000_00805f9b34fb);
const CURRENT_READINGS_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0xF0CD3001_95DA_4F4B_9AC8_AA55D312AF0C);

const SCAN_DURATION: Duration = Duration::from_secs(5);

/// Find Aranet4 devices in range, strongest signal first.
pub async fn scan_aranets() -> Result<Vec<DiscoveredDevice>> {
    let adapter = default_adapter().await?;
    let devices = discover(&adapter).await?;
    Ok(devices
        .into_iter()
        .filter(|(_, device)| device.name.contains("Aranet4"))
        .map(|(_, device)| device)
        .collect())
}

pub struct Aranet4 {
    device: DiscoveredDevice,
    peripheral: Peripheral,
    sensor_char: Characteristic,
}

impl Aranet4 {
    /// Connect to the device with the given address, or to the
    /// strongest-signal Aranet4 in range when the address is empty.
    pub async fn connect(address: &str) -> Result<Self> {
        let adapter = default_adapter().await?;
        let discovered = discover(&adapter).await?;

        let (peripheral, device) = if address.is_empty() {
            discovered
                .into_iter()
                .find(|(_, device)| device.name.contains("Aranet4"))
                .ok_or_else(|| anyhow!("no Aranet4 devices discovered"))?
        } else {
            discovered
                .into_iter()
                .find(|(_, device)| device.address.eq_ignore_ascii_case(address))
                .ok_or_else(|| anyhow!("could not find device {}", address))?
        };

        peripheral.connect().await.context("failed to connect")?;
        peripheral
            .discover_services()
            .await
            .context("failed to discover services")?;

        let sensor_char =
            find_characteristic(&peripheral, ARANET4_SERVICE, CURRENT_READINGS_CHARACTERISTIC)
                .ok_or_else(|| anyhow!("current readings characteristic not found"))?;

        Ok(Self {
            device,
            peripheral,
            sensor_char,
        })
    }

    pub async fn read(&self) -> Result<Reading> {
        let data = self.peripheral.read(&self.sensor_char).await?;
        Reading::from_bytes(&self.device, &data)
            .ok_or_else(|| anyhow!("failed to parse sensor data"))
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

async fn default_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;
    adapters
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no Bluetooth adapters found"))
}

/// One scan window, returning everything seen sorted by descending RSSI.
async fn discover(adapter: &Adapter) -> Result<Vec<(Peripheral, DiscoveredDevice)>> {
    adapter.start_scan(ScanFilter::default()).await?;
    sleep(SCAN_DURATION).await;
    adapter.stop_scan().await?;

    let mut devices = Vec::new();
    for peripheral in adapter.peripherals().await? {
        let Some(props) = peripheral.properties().await? else {
            continue;
        };

        let device = DiscoveredDevice {
            name: props.local_name.unwrap_or_default(),
            address: props.address.to_string(),
            rssi: props.rssi.unwrap_or(i16::MIN),
        };
        devices.push((peripheral, device));
    }
    devices.sort_by_key(|(_, device)| Reverse(device.rssi));

    Ok(devices)
}

fn find_characteristic(
    peripheral: &Peripheral,
    service_uuid: Uuid,
    char_uuid: Uuid,
) -> Option<Characteristic> {
    for service in peripheral.services() {
        if service.uuid == service_uuid {
            for characteristic in service.characteristics {
                if characteristic.uuid == char_uuid {
                    return Some(characteristic);
                }
            }
        }
    }
    None
}
