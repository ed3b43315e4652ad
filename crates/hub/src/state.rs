use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::channel::Channel;
use crate::error::MonitorResult;
use crate::history::HistoryStore;
use crate::liveness::{DeviceStatus, Liveness, LivenessTracker, Transition};
use crate::reading::{self, ChannelFields, Latest, PumpFields, RawFields, Reading, Source};

/// Device id stamped on pump commands issued before any device reported in.
const CONTROL_DEVICE_ID: &str = "WEB_CONTROL";

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<Monitor>>;

pub fn shared(monitor: Monitor) -> SharedState {
    Arc::new(RwLock::new(monitor))
}

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Sole owner of reading history and liveness state.
pub struct Monitor {
    pub started_at: Instant,
    history: HistoryStore,
    liveness: LivenessTracker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpAction {
    On,
    Off,
}

impl PumpAction {
    /// Accepts "on"/"off" in any case, surrounding whitespace ignored.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Some(PumpAction::On),
            "off" => Some(PumpAction::Off),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// JSON responses (what the operations return)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct IngestAck {
    pub channel: Channel,
    pub device_id: String,
    pub device_online: bool,
    pub unix_timestamp: i64,
    #[serde(skip)]
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlAck {
    pub device_online: bool,
    pub unix_timestamp: i64,
    pub data: Reading,
    #[serde(skip)]
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryView {
    pub data: Vec<Reading>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub online: bool,
    pub last_update: Option<i64>,
    pub history_count: usize,
    pub data: Latest,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelAge {
    pub last_update: Option<i64>,
    pub age_seconds: Option<i64>,
    pub status: Liveness,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub device_id: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<i64>,
    pub sensor_updates: BTreeMap<Channel, ChannelAge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetScope {
    Channel(Channel),
    All,
}

// ---------------------------------------------------------------------------
// Construction & operations
// ---------------------------------------------------------------------------

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            history: HistoryStore::new(),
            liveness: LivenessTracker::new(),
        }
    }

    /// Validate, stamp and store a device reading, then record liveness.
    ///
    /// The device id is taken from `device_id`, else from a `deviceId` or
    /// `device_id` string in the payload, else synthesized from the channel.
    pub fn ingest(
        &mut self,
        channel: &str,
        raw: &RawFields,
        device_id: Option<&str>,
        now: i64,
    ) -> MonitorResult<IngestAck> {
        let channel: Channel = channel.parse()?;
        let fields = reading::validate(channel, raw);

        let device_id = device_id
            .or_else(|| payload_device_id(raw))
            .map(str::to_string)
            .unwrap_or_else(|| channel.fallback_device_id());

        self.history
            .append(Reading::stamp(fields, device_id.clone(), Source::Device, now));
        let transition = self
            .liveness
            .record_update(channel, now, Some(device_id.clone()));

        Ok(IngestAck {
            channel,
            device_id,
            device_online: self.liveness.is_online(),
            unix_timestamp: now,
            transition,
        })
    }

    /// Record a commanded pump state as a control-originated reading.
    pub fn control_pump(&mut self, action: PumpAction, mode: Option<&str>, now: i64) -> ControlAck {
        let fields = ChannelFields::Pump(PumpFields {
            status: action == PumpAction::On,
            mode: reading::pump_mode(mode),
        });
        let device_id = self
            .liveness
            .device_id()
            .unwrap_or(CONTROL_DEVICE_ID)
            .to_string();

        let reading = Reading::stamp(fields, device_id, Source::Control, now);
        self.history.append(reading.clone());
        let transition = self.liveness.record_update(Channel::Pump, now, None);

        ControlAck {
            device_online: self.liveness.is_online(),
            unix_timestamp: now,
            data: reading,
            transition,
        }
    }

    pub fn latest(&self, channel: &str) -> MonitorResult<Latest> {
        let channel: Channel = channel.parse()?;
        Ok(self.history.latest(channel))
    }

    pub fn history(&self, channel: &str) -> MonitorResult<HistoryView> {
        let channel: Channel = channel.parse()?;
        let data = self.history.history(channel);
        Ok(HistoryView {
            count: data.len(),
            data,
        })
    }

    pub fn last_update(&self, channel: Channel) -> Option<i64> {
        self.liveness.last_update(channel)
    }

    pub fn device_status(&self) -> DeviceStatus {
        self.liveness.status()
    }

    pub fn channel_status(&self, channel: Channel, now: i64) -> Liveness {
        self.liveness.channel_status(channel, now)
    }

    pub fn channel_statuses(&self, now: i64) -> BTreeMap<Channel, ChannelStatus> {
        Channel::ALL
            .iter()
            .map(|&c| {
                (
                    c,
                    ChannelStatus {
                        online: self.channel_status(c, now).is_online(),
                        last_update: self.liveness.last_update(c),
                        history_count: self.history.count(c),
                        data: self.history.latest(c),
                    },
                )
            })
            .collect()
    }

    pub fn device_info(&self, now: i64) -> DeviceInfo {
        let status = self.liveness.status();
        let sensor_updates = Channel::ALL
            .iter()
            .map(|&c| {
                let last_update = self.liveness.last_update(c);
                let age_seconds =
                    last_update.map(|t| ((now - t) as f64 / 1000.0).round() as i64);
                (
                    c,
                    ChannelAge {
                        last_update,
                        age_seconds,
                        status: self.channel_status(c, now),
                    },
                )
            })
            .collect();

        DeviceInfo {
            device_id: status.device_id,
            is_online: status.is_online,
            last_seen: status.last_seen,
            sensor_updates,
        }
    }

    /// Number of channels currently within the liveness window.
    pub fn channels_online(&self, now: i64) -> usize {
        Channel::ALL
            .iter()
            .filter(|&&c| self.channel_status(c, now).is_online())
            .count()
    }

    /// Reset one channel, or everything when `channel` is `None`.
    pub fn reset(&mut self, channel: Option<&str>) -> MonitorResult<ResetScope> {
        match channel {
            Some(name) => {
                let channel: Channel = name.parse()?;
                self.history.reset(channel);
                self.liveness.clear(channel);
                Ok(ResetScope::Channel(channel))
            }
            None => {
                self.history.reset_all();
                self.liveness.clear_all();
                Ok(ResetScope::All)
            }
        }
    }

    pub fn evaluate(&mut self, now: i64) -> Option<Transition> {
        self.liveness.evaluate(now)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

fn payload_device_id(raw: &RawFields) -> Option<&str> {
    ["deviceId", "device_id"]
        .iter()
        .filter_map(|k| raw.get(*k).and_then(|v| v.as_str()))
        .find(|s| !s.is_empty())
}

// ===========================================================================
// Tests
// ===========================================================================
