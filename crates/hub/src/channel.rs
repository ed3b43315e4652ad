//! The closed set of sensor channels a device can report on.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::MonitorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Power,
    Temperature,
    Ph,
    Tds,
    Pump,
}

impl Channel {
    pub const COUNT: usize = 5;

    /// Every channel, in canonical order.
    pub const ALL: [Channel; Channel::COUNT] = [
        Channel::Power,
        Channel::Temperature,
        Channel::Ph,
        Channel::Tds,
        Channel::Pump,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Power => "power",
            Channel::Temperature => "temperature",
            Channel::Ph => "ph",
            Channel::Tds => "tds",
            Channel::Pump => "pump",
        }
    }

    /// Slot used by the fixed-size per-channel tables.
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Device id used when a payload does not name its sender.
    pub fn fallback_device_id(self) -> String {
        format!("ESP32_{}", self.as_str().to_uppercase())
    }

    /// Comma-separated list of valid names, for error messages.
    pub fn valid_names() -> String {
        Channel::ALL
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Exact, case-sensitive membership test.
pub fn is_valid(name: &str) -> bool {
    name.parse::<Channel>().is_ok()
}

impl FromStr for Channel {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| MonitorError::InvalidChannel(s.to_string()))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
