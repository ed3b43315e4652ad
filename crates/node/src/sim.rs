//! Stateful greenhouse device simulator for local development.
//!
//! Each numeric field follows a bounded random walk with mean reversion, so
//! consecutive readings stay coherent. Derived fields (active power, heat
//! index, accumulated energy) are computed from the walked ones. The `flaky`
//! scenario corrupts fields to exercise the hub's sanitization.

use serde_json::{Map, Value};
use std::fmt;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Clean readings with gentle drift.
    Stable,
    /// Noisier walks; about one field in eight is dropped, nulled or sent
    /// as the string "NaN".
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "flaky" => Self::Flaky,
            _ => Self::Stable,
        }
    }

    fn noise_scale(self) -> f64 {
        match self {
            Self::Stable => 1.0,
            Self::Flaky => 3.0,
        }
    }

    fn corrupt_prob(self) -> f64 {
        match self {
            Self::Stable => 0.0,
            Self::Flaky => 0.125,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimChannel {
    Power,
    Temperature,
    Ph,
    Tds,
    Pump,
}

impl SimChannel {
    pub const ALL: [SimChannel; 5] = [
        SimChannel::Power,
        SimChannel::Temperature,
        SimChannel::Ph,
        SimChannel::Tds,
        SimChannel::Pump,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SimChannel::Power => "power",
            SimChannel::Temperature => "temperature",
            SimChannel::Ph => "ph",
            SimChannel::Tds => "tds",
            SimChannel::Pump => "pump",
        }
    }
}

// ---------------------------------------------------------------------------
// Random walk
// ---------------------------------------------------------------------------

/// One walked quantity, kept inside `[min, max]`.
struct Walk {
    value: f64,
    center: f64,
    sigma: f64,
    reversion: f64,
    min: f64,
    max: f64,
}

impl Walk {
    fn new(center: f64, sigma: f64, min: f64, max: f64) -> Self {
        Self {
            value: (center + gaussian(0.0, sigma)).clamp(min, max),
            center,
            sigma,
            reversion: 0.05,
            min,
            max,
        }
    }

    fn step(&mut self, noise_scale: f64) -> f64 {
        let pull = self.reversion * (self.center - self.value);
        let walk = gaussian(0.0, self.sigma * noise_scale);
        self.value = (self.value + pull + walk).clamp(self.min, self.max);
        self.value
    }
}

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

pub struct DeviceSim {
    scenario: Scenario,

    voltage: Walk,
    current: Walk,
    frequency: Walk,
    power_factor: Walk,
    energy_kwh: f64,

    suhu: Walk,
    kelembaban: Walk,

    ph: Walk,
    tds: Walk,
    suhu_air: Walk,

    pump_on: bool,
    /// Chance per sample that the pump flips state.
    pump_toggle_prob: f64,
}

impl DeviceSim {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            voltage: Walk::new(220.0, 1.5, 190.0, 250.0),
            current: Walk::new(2.5, 0.1, 0.0, 10.0),
            frequency: Walk::new(50.0, 0.02, 49.0, 51.0),
            power_factor: Walk::new(0.92, 0.01, 0.5, 1.0),
            energy_kwh: 0.0,
            suhu: Walk::new(28.0, 0.3, 15.0, 45.0),
            kelembaban: Walk::new(70.0, 1.0, 20.0, 100.0),
            ph: Walk::new(6.5, 0.05, 4.0, 9.0),
            tds: Walk::new(700.0, 10.0, 0.0, 2000.0),
            suhu_air: Walk::new(26.0, 0.2, 15.0, 40.0),
            pump_on: false,
            pump_toggle_prob: 0.05,
        }
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    /// Produce the next payload for `channel`. `elapsed_s` is the time since
    /// the previous power sample, used to accumulate energy.
    pub fn sample(&mut self, channel: SimChannel, elapsed_s: f64) -> Map<String, Value> {
        let k = self.scenario.noise_scale();
        let mut fields = Map::new();

        match channel {
            SimChannel::Power => {
                let voltage = self.voltage.step(k);
                let current = self.current.step(k);
                let pf = self.power_factor.step(k);
                let power = voltage * current * pf;
                self.energy_kwh += power * elapsed_s / 3_600_000.0;

                insert(&mut fields, "voltage", voltage);
                insert(&mut fields, "current", current);
                insert(&mut fields, "power", power);
                insert(&mut fields, "energy", self.energy_kwh);
                insert(&mut fields, "frequency", self.frequency.step(k));
                insert(&mut fields, "power_factor", pf);
            }
            SimChannel::Temperature => {
                let suhu = self.suhu.step(k);
                let rh = self.kelembaban.step(k);
                insert(&mut fields, "suhu", suhu);
                insert(&mut fields, "kelembaban", rh);
                insert(&mut fields, "heat_index", heat_index(suhu, rh));
            }
            SimChannel::Ph => {
                insert(&mut fields, "ph", self.ph.step(k));
            }
            SimChannel::Tds => {
                insert(&mut fields, "tds", self.tds.step(k));
                insert(&mut fields, "suhu_air", self.suhu_air.step(k));
            }
            SimChannel::Pump => {
                if fastrand::f64() < self.pump_toggle_prob {
                    self.pump_on = !self.pump_on;
                }
                fields.insert("status".into(), Value::Bool(self.pump_on));
                fields.insert("mode".into(), Value::String("auto".into()));
                // Pump state is never corrupted; its status must be a bool.
                return fields;
            }
        }

        self.corrupt(&mut fields);
        fields
    }

    /// Drop, null or stringify-as-NaN individual fields with the scenario's
    /// corruption probability.
    fn corrupt(&self, fields: &mut Map<String, Value>) {
        let p = self.scenario.corrupt_prob();
        if p == 0.0 {
            return;
        }
        let keys: Vec<String> = fields.keys().cloned().collect();
        for key in keys {
            if fastrand::f64() >= p {
                continue;
            }
            match fastrand::u8(0..3) {
                0 => {
                    fields.remove(&key);
                }
                1 => {
                    fields.insert(key, Value::Null);
                }
                _ => {
                    fields.insert(key, Value::String("NaN".into()));
                }
            }
        }
    }
}

fn insert(fields: &mut Map<String, Value>, key: &str, v: f64) {
    fields.insert(key.to_string(), Value::from(round2(v)));
}

/// Heat index in Celsius (Rothfusz regression, applied above 27 C).
fn heat_index(t_c: f64, rh: f64) -> f64 {
    if t_c < 27.0 {
        return t_c;
    }
    let t = t_c * 9.0 / 5.0 + 32.0;
    let hi_f = -42.379 + 2.049_015_23 * t + 10.143_331_27 * rh
        - 0.224_755_41 * t * rh
        - 0.006_837_83 * t * t
        - 0.054_817_17 * rh * rh
        + 0.001_228_74 * t * t * rh
        + 0.000_852_82 * t * rh * rh
        - 0.000_001_99 * t * t * rh * rh;
    (hi_f - 32.0) * 5.0 / 9.0
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn num(fields: &Map<String, Value>, key: &str) -> f64 {
        fields[key].as_f64().unwrap()
    }

    #[test]
    fn stable_payloads_are_complete_and_numeric() {
        let mut sim = DeviceSim::new(Scenario::Stable);
        for _ in 0..200 {
            let p = sim.sample(SimChannel::Power, 5.0);
            for key in ["voltage", "current", "power", "energy", "frequency", "power_factor"] {
                assert!(p[key].is_f64(), "power.{key} not numeric: {p:?}");
            }
            let t = sim.sample(SimChannel::Temperature, 5.0);
            assert_eq!(t.len(), 3);
            let ph = sim.sample(SimChannel::Ph, 5.0);
            assert!(ph["ph"].is_f64());
            let tds = sim.sample(SimChannel::Tds, 5.0);
            assert!(tds["tds"].is_f64() && tds["suhu_air"].is_f64());
        }
    }

    #[test]
    fn walks_stay_in_bounds() {
        let mut sim = DeviceSim::new(Scenario::Flaky);
        for _ in 0..1000 {
            let ph = sim.ph.step(3.0);
            assert!((4.0..=9.0).contains(&ph), "ph out of range: {ph}");
            let v = sim.voltage.step(3.0);
            assert!((190.0..=250.0).contains(&v), "voltage out of range: {v}");
        }
    }

    #[test]
    fn consecutive_readings_are_coherent() {
        let mut sim = DeviceSim::new(Scenario::Stable);
        let samples: Vec<f64> = (0..100)
            .map(|_| num(&sim.sample(SimChannel::Ph, 5.0), "ph"))
            .collect();
        let max_jump = samples
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0_f64, f64::max);
        assert!(max_jump < 1.0, "max consecutive ph jump too large: {max_jump}");
    }

    #[test]
    fn energy_accumulates() {
        let mut sim = DeviceSim::new(Scenario::Stable);
        let first = num(&sim.sample(SimChannel::Power, 3600.0), "energy");
        let second = num(&sim.sample(SimChannel::Power, 3600.0), "energy");
        assert!(first > 0.0);
        assert!(second > first);
    }

    #[test]
    fn flaky_scenario_corrupts_some_fields() {
        let mut sim = DeviceSim::new(Scenario::Flaky);
        let mut corrupted = 0;
        for _ in 0..200 {
            let p = sim.sample(SimChannel::Power, 5.0);
            if p.len() < 6 || p.values().any(|v| !v.is_f64()) {
                corrupted += 1;
            }
        }
        assert!(corrupted > 0, "flaky scenario never corrupted a payload");
    }

    #[test]
    fn pump_payload_is_never_corrupted() {
        let mut sim = DeviceSim::new(Scenario::Flaky);
        for _ in 0..200 {
            let p = sim.sample(SimChannel::Pump, 5.0);
            assert!(p["status"].is_boolean());
            assert_eq!(p["mode"], "auto");
        }
    }

    #[test]
    fn heat_index_below_threshold_is_temperature() {
        assert_eq!(heat_index(25.0, 80.0), 25.0);
        assert!(heat_index(32.0, 70.0) > 32.0);
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("FLAKY"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("stable"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy("drying"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Stable);
    }

    #[test]
    fn scenario_display() {
        assert_eq!(Scenario::Stable.to_string(), "stable");
        assert_eq!(Scenario::Flaky.to_string(), "flaky");
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let n = 5000;
        let mean: f64 = (0..n).map(|_| approx_std_normal()).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.15, "mean should be near zero: {mean}");
    }
}
