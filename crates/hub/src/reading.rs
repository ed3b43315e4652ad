//! Typed per-channel readings and the lenient validator that builds them
//! from raw device payloads.
//!
//! Validation never fails: a numeric field that is missing, not a number, or
//! not finite is replaced by the channel's default. Unknown fields are
//! dropped.

use serde::Serialize;
use serde_json::{Map, Value};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::channel::Channel;

/// Raw JSON object as pushed by a device.
pub type RawFields = Map<String, Value>;

/// Neutral pH, used when a ph reading is unusable.
pub const DEFAULT_PH: f64 = 7.0;

pub const DEFAULT_PUMP_MODE: &str = "manual";

// ---------------------------------------------------------------------------
// Field records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerFields {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub energy: f64,
    pub frequency: f64,
    pub power_factor: f64,
}

/// Air temperature (`suhu`), relative humidity (`kelembaban`) and heat index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureFields {
    pub suhu: f64,
    pub kelembaban: f64,
    pub heat_index: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhFields {
    pub ph: f64,
}

/// Total dissolved solids and water temperature (`suhu_air`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TdsFields {
    pub tds: f64,
    pub suhu_air: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PumpFields {
    pub status: bool,
    pub mode: String,
}

impl Default for PumpFields {
    fn default() -> Self {
        Self {
            status: false,
            mode: DEFAULT_PUMP_MODE.to_string(),
        }
    }
}

/// Sanitized fields, one variant per channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChannelFields {
    Power(PowerFields),
    Temperature(TemperatureFields),
    Ph(PhFields),
    Tds(TdsFields),
    Pump(PumpFields),
}

impl ChannelFields {
    pub fn channel(&self) -> Channel {
        match self {
            ChannelFields::Power(_) => Channel::Power,
            ChannelFields::Temperature(_) => Channel::Temperature,
            ChannelFields::Ph(_) => Channel::Ph,
            ChannelFields::Tds(_) => Channel::Tds,
            ChannelFields::Pump(_) => Channel::Pump,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Build the sanitized field record for `channel` from a raw payload.
pub fn validate(channel: Channel, raw: &RawFields) -> ChannelFields {
    match channel {
        Channel::Power => ChannelFields::Power(PowerFields {
            voltage: finite_or(number(raw, "voltage"), 0.0),
            current: finite_or(number(raw, "current"), 0.0),
            power: finite_or(number(raw, "power"), 0.0),
            energy: finite_or(number(raw, "energy"), 0.0),
            frequency: finite_or(number(raw, "frequency"), 0.0),
            power_factor: finite_or(number(raw, "power_factor"), 0.0),
        }),
        Channel::Temperature => ChannelFields::Temperature(TemperatureFields {
            suhu: finite_or(number(raw, "suhu"), 0.0),
            kelembaban: finite_or(number(raw, "kelembaban"), 0.0),
            heat_index: finite_or(number(raw, "heat_index"), 0.0),
        }),
        Channel::Ph => ChannelFields::Ph(PhFields {
            ph: finite_or(number(raw, "ph"), DEFAULT_PH),
        }),
        Channel::Tds => ChannelFields::Tds(TdsFields {
            tds: finite_or(number(raw, "tds"), 0.0),
            suhu_air: finite_or(number(raw, "suhu_air"), 0.0),
        }),
        Channel::Pump => ChannelFields::Pump(PumpFields {
            status: raw.get("status").and_then(Value::as_bool).unwrap_or(false),
            mode: pump_mode(raw.get("mode").and_then(Value::as_str)),
        }),
    }
}

/// A non-empty mode is kept as-is; anything else falls back to manual.
pub fn pump_mode(mode: Option<&str>) -> String {
    match mode {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => DEFAULT_PUMP_MODE.to_string(),
    }
}

/// Numbers are taken directly; numeric strings are parsed. Everything else
/// counts as missing.
fn number(raw: &RawFields, key: &str) -> Option<f64> {
    match raw.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub(crate) fn finite_or(value: Option<f64>, default: f64) -> f64 {
    match value {
        Some(v) if v.is_finite() => v,
        _ => default,
    }
}

// ---------------------------------------------------------------------------
// Stored reading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// Pushed by the field device.
    Device,
    /// Synthesized from a pump command.
    Control,
}

/// A validated reading with the metadata stamped at ingest time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    #[serde(flatten)]
    pub fields: ChannelFields,
    /// Wall-clock time of day, UTC.
    pub timestamp: String,
    /// Wall-clock date, UTC.
    pub date: String,
    pub device_id: String,
    pub channel: Channel,
    pub source: Source,
    /// Milliseconds since the Unix epoch.
    pub unix_timestamp: i64,
}

impl Reading {
    pub fn stamp(fields: ChannelFields, device_id: String, source: Source, unix_ms: i64) -> Self {
        let (timestamp, date) = wall_clock(unix_ms);
        Self {
            channel: fields.channel(),
            fields,
            timestamp,
            date,
            device_id,
            source,
            unix_timestamp: unix_ms,
        }
    }
}

/// Latest snapshot for a channel: the newest reading, or the channel's
/// default shape when nothing has been recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Latest {
    Recorded(Reading),
    /// Pump default: off, manual.
    PumpIdle(PumpFields),
    /// Sensor default: an empty object.
    Empty {},
}

impl Latest {
    pub fn default_for(channel: Channel) -> Self {
        match channel {
            Channel::Pump => Latest::PumpIdle(PumpFields::default()),
            _ => Latest::Empty {},
        }
    }

    pub fn reading(&self) -> Option<&Reading> {
        match self {
            Latest::Recorded(r) => Some(r),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Clock helpers
// ---------------------------------------------------------------------------

/// Current wall clock in epoch milliseconds.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// (`HH:MM:SS`, `YYYY-MM-DD`) for an epoch-millisecond timestamp, in UTC.
pub fn wall_clock(unix_ms: i64) -> (String, String) {
    let dt = OffsetDateTime::from_unix_timestamp_nanos(unix_ms as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let time = dt
        .format(format_description!("[hour]:[minute]:[second]"))
        .unwrap_or_default();
    let date = dt
        .format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_default();
    (time, date)
}
