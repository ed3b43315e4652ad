//! MQTT ingest transport: topic routing and payload parsing, plus the event
//! loop that feeds accepted messages into the shared monitor.

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::channel;
use crate::config::MqttConfig;
use crate::reading::{now_millis, RawFields};
use crate::recheck::log_transition;
use crate::state::{PumpAction, SharedState};

pub(crate) const TELEMETRY_FILTER: &str = "tele/+/reading";
pub(crate) const PUMP_COMMAND_TOPIC: &str = "pump/set";

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Extract the channel segment from "tele/<channel>/reading". The name is
/// validated later by the monitor.
pub(crate) fn extract_channel(topic: &str) -> Option<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "tele" && parts[2] == "reading" && !parts[1].is_empty() {
        Some(parts[1])
    } else {
        None
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct PumpCommand {
    pub(crate) action: PumpAction,
    pub(crate) mode: Option<String>,
}

/// Parse "ON", "OFF" or "ON:<mode>" (case-insensitive action, trimmed).
pub(crate) fn parse_pump_command(payload: &[u8]) -> Result<PumpCommand, String> {
    let s = String::from_utf8_lossy(payload);
    let s = s.trim();
    let (action, mode) = match s.split_once(':') {
        Some((a, m)) => (a, Some(m.trim().to_string()).filter(|m| !m.is_empty())),
        None => (s, None),
    };
    match PumpAction::parse(action) {
        Some(action) => Ok(PumpCommand { action, mode }),
        None => Err(format!("unknown pump command '{s}'")),
    }
}

pub(crate) fn parse_reading(payload: &[u8]) -> Result<RawFields, serde_json::Error> {
    serde_json::from_slice(payload)
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

pub async fn connect(cfg: &MqttConfig) -> Result<(AsyncClient, EventLoop)> {
    let mut options = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
    options.set_keep_alive(Duration::from_secs(30));

    let (client, eventloop) = AsyncClient::new(options, 20);
    client
        .subscribe(TELEMETRY_FILTER, QoS::AtLeastOnce)
        .await
        .context("failed to subscribe to telemetry topics")?;
    client
        .subscribe(PUMP_COMMAND_TOPIC, QoS::AtLeastOnce)
        .await
        .context("failed to subscribe to pump command topic")?;

    info!(
        host = %cfg.host,
        port = cfg.port,
        "mqtt subscribed to {TELEMETRY_FILTER} and {PUMP_COMMAND_TOPIC}"
    );
    Ok((client, eventloop))
}

/// Poll the broker until shutdown. Broker errors are logged and retried.
pub async fn run(mut eventloop: EventLoop, shared: SharedState, mut shutdown: watch::Receiver<bool>) {
    loop {
        let event = tokio::select! {
            event = eventloop.poll() => event,
            _ = shutdown.changed() => break,
        };

        match event {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                handle_publish(&shared, &p.topic, &p.payload, now_millis()).await;
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt connected"),
            Ok(Event::Incoming(Packet::Disconnect)) => warn!("mqtt disconnected"),
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt error: {e}. reconnecting...");
                sleep(Duration::from_secs(2)).await;
            }
        }
    }
    info!("mqtt loop stopped");
}

pub(crate) async fn handle_publish(shared: &SharedState, topic: &str, payload: &[u8], now: i64) {
    if let Some(channel) = extract_channel(topic) {
        if !channel::is_valid(channel) {
            warn!(%topic, "unknown channel '{channel}', reading dropped");
            return;
        }
        let raw = match parse_reading(payload) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%topic, "bad telemetry json: {e}");
                return;
            }
        };
        let mut st = shared.write().await;
        match st.ingest(channel, &raw, None, now) {
            Ok(ack) => {
                if let Some(t) = ack.transition {
                    log_transition(t, &st.device_status());
                }
                info!(
                    channel = %ack.channel,
                    device = %ack.device_id,
                    "reading received over mqtt"
                );
            }
            Err(e) => warn!(%topic, "rejected reading: {e}"),
        }
    } else if topic == PUMP_COMMAND_TOPIC {
        match parse_pump_command(payload) {
            Ok(cmd) => {
                let mut st = shared.write().await;
                let ack = st.control_pump(cmd.action, cmd.mode.as_deref(), now);
                if let Some(t) = ack.transition {
                    log_transition(t, &st.device_status());
                }
                info!(
                    action = ?cmd.action,
                    device = %ack.data.device_id,
                    "pump command received over mqtt"
                );
            }
            Err(msg) => warn!("{msg} (use ON/OFF)"),
        }
    } else {
        warn!(%topic, "unhandled topic");
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::state::{shared, Monitor};

    // -- extract_channel ----------------------------------------------------

    #[test]
    fn extract_channel_valid_topic() {
        assert_eq!(extract_channel("tele/power/reading"), Some("power"));
    }

    #[test]
    fn extract_channel_passes_unknown_names_through() {
        assert_eq!(extract_channel("tele/lux/reading"), Some("lux"));
    }

    #[test]
    fn extract_channel_wrong_prefix() {
        assert_eq!(extract_channel("foo/ph/reading"), None);
    }

    #[test]
    fn extract_channel_wrong_suffix() {
        assert_eq!(extract_channel("tele/ph/status"), None);
    }

    #[test]
    fn extract_channel_bad_segment_counts() {
        assert_eq!(extract_channel("tele/reading"), None);
        assert_eq!(extract_channel("tele/ph/sub/reading"), None);
        assert_eq!(extract_channel("tele//reading"), None);
        assert_eq!(extract_channel(""), None);
    }

    // -- parse_pump_command -------------------------------------------------

    #[test]
    fn parse_pump_command_plain() {
        assert_eq!(
            parse_pump_command(b"ON"),
            Ok(PumpCommand {
                action: PumpAction::On,
                mode: None
            })
        );
        assert_eq!(
            parse_pump_command(b"\toff\n"),
            Ok(PumpCommand {
                action: PumpAction::Off,
                mode: None
            })
        );
    }

    #[test]
    fn parse_pump_command_with_mode() {
        assert_eq!(
            parse_pump_command(b"on:eco"),
            Ok(PumpCommand {
                action: PumpAction::On,
                mode: Some("eco".into())
            })
        );
        assert_eq!(
            parse_pump_command(b"OFF: "),
            Ok(PumpCommand {
                action: PumpAction::Off,
                mode: None
            })
        );
    }

    #[test]
    fn parse_pump_command_garbage() {
        assert!(parse_pump_command(b"TOGGLE").is_err());
        assert!(parse_pump_command(b"").is_err());
    }

    // -- parse_reading ------------------------------------------------------

    #[test]
    fn parse_reading_object() {
        let raw = parse_reading(br#"{"ph":6.4,"deviceId":"esp"}"#).unwrap();
        assert_eq!(raw["ph"], 6.4);
    }

    #[test]
    fn parse_reading_rejects_non_objects() {
        assert!(parse_reading(b"[1,2]").is_err());
        assert!(parse_reading(b"not json").is_err());
    }

    // -- handle_publish -----------------------------------------------------

    #[tokio::test]
    async fn publish_on_telemetry_topic_ingests() {
        let st = shared(Monitor::new());
        handle_publish(&st, "tele/ph/reading", br#"{"ph":"NaN","deviceId":"esp-1"}"#, 5_000).await;

        let m = st.read().await;
        assert_eq!(m.last_update(Channel::Ph), Some(5_000));
        assert_eq!(m.device_status().device_id.as_deref(), Some("esp-1"));
        let v = serde_json::to_value(m.latest("ph").unwrap()).unwrap();
        assert_eq!(v["ph"], 7.0);
    }

    #[tokio::test]
    async fn publish_with_unknown_channel_or_bad_json_is_dropped() {
        let st = shared(Monitor::new());
        handle_publish(&st, "tele/lux/reading", br#"{"lux":1}"#, 1).await;
        handle_publish(&st, "tele/ph/reading", b"{oops", 2).await;
        assert!(!st.read().await.device_status().is_online);
    }

    #[tokio::test]
    async fn publish_on_pump_topic_controls_pump() {
        let st = shared(Monitor::new());
        handle_publish(&st, PUMP_COMMAND_TOPIC, b"ON:auto", 9_000).await;

        let m = st.read().await;
        let v = serde_json::to_value(m.latest("pump").unwrap()).unwrap();
        assert_eq!(v["status"], true);
        assert_eq!(v["mode"], "auto");
        assert_eq!(v["source"], "control");
        assert_eq!(m.last_update(Channel::Pump), Some(9_000));
    }
}
