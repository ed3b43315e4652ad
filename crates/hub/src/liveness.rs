//! Per-channel freshness and the aggregate device online/offline state.
//!
//! ```text
//! Offline ──[any channel updated within window]──▶ Online
//!    ▲                                               │
//!    └──────[re-check: no channel within window]─────┘
//! ```
//!
//! An ingest flips the device Online immediately. Going Offline only happens
//! in `evaluate`, which runs on the re-check cadence and before status reads.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::channel::Channel;

/// A channel is fresh while `now - last_update` is below this.
pub const LIVENESS_WINDOW_MS: i64 = 30_000;

/// How often the device state is recomputed without new data.
pub const RECHECK_INTERVAL: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Online,
    Offline,
}

impl Liveness {
    pub fn is_online(self) -> bool {
        self == Liveness::Online
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    CameOnline,
    WentOffline,
}

/// Snapshot of the tracked device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub is_online: bool,
    pub last_seen: Option<i64>,
    pub device_id: Option<String>,
    pub last_sensor_update: BTreeMap<Channel, Option<i64>>,
}

pub fn is_fresh(last_update: Option<i64>, now: i64) -> bool {
    matches!(last_update, Some(t) if now - t < LIVENESS_WINDOW_MS)
}

#[derive(Debug, Default)]
pub struct LivenessTracker {
    online: bool,
    last_seen: Option<i64>,
    device_id: Option<String>,
    last_update: [Option<i64>; Channel::COUNT],
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp `channel` as updated at `at` and mark the device online.
    pub fn record_update(
        &mut self,
        channel: Channel,
        at: i64,
        device_id: Option<String>,
    ) -> Option<Transition> {
        self.last_update[channel.index()] = Some(at);
        self.last_seen = Some(at);
        if let Some(id) = device_id {
            self.device_id = Some(id);
        }
        self.set_online(true)
    }

    /// Recompute the device flag: online iff any channel is fresh.
    pub fn evaluate(&mut self, now: i64) -> Option<Transition> {
        let any_fresh = self.last_update.iter().any(|t| is_fresh(*t, now));
        self.set_online(any_fresh)
    }

    pub fn channel_status(&self, channel: Channel, now: i64) -> Liveness {
        if is_fresh(self.last_update(channel), now) {
            Liveness::Online
        } else {
            Liveness::Offline
        }
    }

    pub fn last_update(&self, channel: Channel) -> Option<i64> {
        self.last_update[channel.index()]
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Forget `channel`'s timestamp. The device flag waits for `evaluate`.
    pub fn clear(&mut self, channel: Channel) {
        self.last_update[channel.index()] = None;
    }

    pub fn clear_all(&mut self) {
        self.last_update = [None; Channel::COUNT];
        self.online = false;
        self.last_seen = None;
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            is_online: self.online,
            last_seen: self.last_seen,
            device_id: self.device_id.clone(),
            last_sensor_update: Channel::ALL
                .iter()
                .map(|c| (*c, self.last_update(*c)))
                .collect(),
        }
    }

    fn set_online(&mut self, online: bool) -> Option<Transition> {
        if self.online == online {
            return None;
        }
        self.online = online;
        Some(if online {
            Transition::CameOnline
        } else {
            Transition::WentOffline
        })
    }
}
