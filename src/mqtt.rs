use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};

use crate::config::MqttConfig;
use crate::models::SinkRecord;

const ACK_TIMEOUT: Duration = Duration::from_secs(10);

fn generate_client_id() -> String {
    let suffix: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(char::from)
        .collect();
    format!("an4mon-{}", suffix)
}

/// Publish one reading to the broker and wait for its acknowledgement.
pub async fn write_mqtt(cfg: &MqttConfig, record: &SinkRecord) -> Result<()> {
    let payload = serde_json::to_string(record)?;

    let mut options = MqttOptions::new(generate_client_id(), &cfg.broker, cfg.port);
    options.set_keep_alive(Duration::from_secs(5));
    if let (Some(username), Some(password)) = (&cfg.username, &cfg.password) {
        options.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(options, 10);
    client
        .publish(&cfg.topic, QoS::AtLeastOnce, false, payload)
        .await
        .context("failed to queue MQTT publish")?;

    let delivery = async {
        loop {
            if let Event::Incoming(Packet::PubAck(_)) = eventloop.poll().await? {
                break;
            }
        }
        Ok::<(), rumqttc::ConnectionError>(())
    };
    tokio::time::timeout(ACK_TIMEOUT, delivery)
        .await
        .context("timed out waiting for MQTT acknowledgement")?
        .with_context(|| format!("failed publishing to MQTT broker {}", cfg.broker))?;

    let _ = client.disconnect().await;
    drain_until_disconnect(&mut eventloop).await;

    info!("published reading to MQTT topic '{}'", cfg.topic);

    Ok(())
}

/// Keep the event loop turning until the disconnect goes out, so the
/// broker sees a clean session end.
async fn drain_until_disconnect(eventloop: &mut EventLoop) {
    let drain = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };
    let _ = tokio::time::timeout(Duration::from_secs(1), drain).await;
}
