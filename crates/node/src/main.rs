mod sim;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{Map, Value};
use std::{env, time::Duration};
use tokio::time::sleep;
use tracing::{info, warn};

use sim::{DeviceSim, Scenario, SimChannel};

#[derive(Debug, Clone, PartialEq)]
struct NodeConfig {
    broker: String,
    port: u16,
    device_id: String,
    sample_every_s: u64,
    scenario: Scenario,
}

impl NodeConfig {
    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            broker: lookup("MQTT_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: lookup("MQTT_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(1883),
            device_id: lookup("DEVICE_ID").unwrap_or_else(|| "ESP32_SIM".to_string()),
            sample_every_s: lookup("SAMPLE_EVERY_S")
                .and_then(|s| s.parse().ok())
                .filter(|&s| s > 0)
                .unwrap_or(5),
            scenario: Scenario::from_str_lossy(&lookup("SIM_SCENARIO").unwrap_or_default()),
        }
    }
}

fn topic_for(channel: SimChannel) -> String {
    format!("tele/{}/reading", channel.as_str())
}

/// Stamp the device id onto a simulated payload.
fn with_device_id(mut fields: Map<String, Value>, device_id: &str) -> Map<String, Value> {
    fields.insert("deviceId".into(), Value::String(device_id.to_string()));
    fields
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = NodeConfig::from_lookup(|k| env::var(k).ok());
    info!(
        device = %cfg.device_id,
        broker = %cfg.broker,
        port = cfg.port,
        every_s = cfg.sample_every_s,
        scenario = %cfg.scenario,
        "node simulator starting"
    );

    let client_id = format!("kebon-node-{}", cfg.device_id);
    let mut mqttoptions = MqttOptions::new(client_id, cfg.broker.clone(), cfg.port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    // Publish-only, but the event loop must run to keep the connection alive.
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => info!("node connected to mqtt"),
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e}. retrying...");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let mut device = DeviceSim::new(cfg.scenario);
    let elapsed_s = cfg.sample_every_s as f64;

    loop {
        for channel in SimChannel::ALL {
            let payload = with_device_id(device.sample(channel, elapsed_s), &cfg.device_id);
            let topic = topic_for(channel);
            let bytes = serde_json::to_vec(&payload)?;

            if let Err(e) = client.publish(&topic, QoS::AtLeastOnce, false, bytes).await {
                warn!(%topic, "publish error: {e}");
            }
        }
        info!(scenario = %device.scenario(), "published readings");

        sleep(Duration::from_secs(cfg.sample_every_s)).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
