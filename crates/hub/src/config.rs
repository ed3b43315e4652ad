//! TOML config file loading, environment overrides, and validation for the
//! web and MQTT transports.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub web: WebConfig,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub bind: String,
    pub port: u16,
    /// Directory served for the dashboard (`index.html` at `/`).
    pub static_dir: String,
    /// Address advertised to dashboard clients in responses.
    pub server_ip: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 3000,
            static_dir: "public".to_string(),
            server_ip: None,
        }
    }
}

impl WebConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .with_context(|| format!("invalid bind address: {}", self.bind))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "kebon-hub".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Apply `WEB_PORT`, `STATIC_DIR`, `MQTT_ENABLED`, `MQTT_HOST` and
    /// `MQTT_PORT` on top of the file values. Unparsable numbers are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("WEB_PORT").and_then(|s| s.parse().ok()) {
            self.web.port = port;
        }
        if let Some(dir) = lookup("STATIC_DIR") {
            self.web.static_dir = dir;
        }
        if let Some(v) = lookup("MQTT_ENABLED") {
            self.mqtt.enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT").and_then(|s| s.parse().ok()) {
            self.mqtt.port = port;
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all sections. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_web(&mut errors);
        self.validate_mqtt(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_web(&self, errors: &mut Vec<String>) {
        let w = &self.web;
        if w.bind.parse::<IpAddr>().is_err() {
            errors.push(format!("web: bind '{}' is not an IP address", w.bind));
        }
        if w.port == 0 {
            errors.push("web: port must be non-zero".to_string());
        }
        if w.static_dir.trim().is_empty() {
            errors.push("web: static_dir is empty".to_string());
        }
        if matches!(&w.server_ip, Some(ip) if ip.trim().is_empty()) {
            errors.push("web: server_ip is empty (omit it instead)".to_string());
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;
        if !m.enabled {
            return;
        }
        if m.host.trim().is_empty() {
            errors.push("mqtt: host is empty".to_string());
        }
        if m.port == 0 {
            errors.push("mqtt: port must be non-zero".to_string());
        }
        if m.client_id.trim().is_empty() {
            errors.push("mqtt: client_id is empty".to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read and parse a TOML config file. A missing file yields the defaults.
pub fn load(path: &str) -> Result<Config> {
    if !Path::new(path).exists() {
        tracing::warn!(%path, "config file not found, using defaults");
        return Ok(Config::default());
    }
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    Ok(config)
}

/// Load, apply process environment overrides, then validate.
pub fn load_from_env(path: &str) -> Result<Config> {
    let mut config = load(path)?;
    config.apply_env(|k| std::env::var(k).ok());
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[web]
bind = "127.0.0.1"
port = 8080
static_dir = "dashboard"
server_ip = "172.16.0.111"

[mqtt]
enabled = true
host = "broker.local"
port = 1884
client_id = "hub-1"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.web.port, 8080);
        assert_eq!(config.web.static_dir, "dashboard");
        assert_eq!(config.web.server_ip.as_deref(), Some("172.16.0.111"));
        assert!(config.mqtt.enabled);
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.client_id, "hub-1");
        config.validate().unwrap();
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.web.bind, "0.0.0.0");
        assert_eq!(config.web.port, 3000);
        assert_eq!(config.web.static_dir, "public");
        assert!(!config.mqtt.enabled);
        config.validate().unwrap();
    }

    #[test]
    fn parse_partial_section_fills_defaults() {
        let config: Config = toml::from_str("[web]\nport = 9000\n").unwrap();
        assert_eq!(config.web.port, 9000);
        assert_eq!(config.web.bind, "0.0.0.0");
    }

    #[test]
    fn socket_addr_combines_bind_and_port() {
        let cfg = Config::default();
        assert_eq!(cfg.web.socket_addr().unwrap().to_string(), "0.0.0.0:3000");
    }

    // -- Env overrides ----------------------------------------------------

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[
            ("WEB_PORT", "4000"),
            ("STATIC_DIR", "/srv/www"),
            ("MQTT_ENABLED", "true"),
            ("MQTT_HOST", "10.0.0.2"),
            ("MQTT_PORT", "8883"),
        ]));
        assert_eq!(cfg.web.port, 4000);
        assert_eq!(cfg.web.static_dir, "/srv/www");
        assert!(cfg.mqtt.enabled);
        assert_eq!(cfg.mqtt.host, "10.0.0.2");
        assert_eq!(cfg.mqtt.port, 8883);
    }

    #[test]
    fn env_unparsable_port_is_ignored() {
        let mut cfg = Config::default();
        cfg.apply_env(env(&[("WEB_PORT", "eighty")]));
        assert_eq!(cfg.web.port, 3000);
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn bad_bind_rejected() {
        let mut cfg = Config::default();
        cfg.web.bind = "localhost".into();
        assert_validation_err(&cfg, "is not an IP address");
    }

    #[test]
    fn zero_web_port_rejected() {
        let mut cfg = Config::default();
        cfg.web.port = 0;
        assert_validation_err(&cfg, "web: port must be non-zero");
    }

    #[test]
    fn empty_static_dir_rejected() {
        let mut cfg = Config::default();
        cfg.web.static_dir = "  ".into();
        assert_validation_err(&cfg, "static_dir is empty");
    }

    #[test]
    fn blank_server_ip_rejected() {
        let mut cfg = Config::default();
        cfg.web.server_ip = Some("".into());
        assert_validation_err(&cfg, "server_ip is empty");
    }

    #[test]
    fn disabled_mqtt_is_not_validated() {
        let mut cfg = Config::default();
        cfg.mqtt.host = "".into();
        cfg.mqtt.client_id = "".into();
        cfg.validate().unwrap();
    }

    #[test]
    fn enabled_mqtt_requires_host_and_client_id() {
        let mut cfg = Config::default();
        cfg.mqtt.enabled = true;
        cfg.mqtt.host = "".into();
        assert_validation_err(&cfg, "mqtt: host is empty");

        cfg.mqtt.host = "broker".into();
        cfg.mqtt.client_id = " ".into();
        assert_validation_err(&cfg, "mqtt: client_id is empty");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = Config::default();
        cfg.web.port = 0;
        cfg.web.bind = "nope".into();
        cfg.mqtt.enabled = true;
        cfg.mqtt.port = 0;

        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("3 errors"), "wrong count in: {msg}");
        assert!(msg.contains("web: port"), "missing web port error in: {msg}");
        assert!(msg.contains("bind"), "missing bind error in: {msg}");
        assert!(msg.contains("mqtt: port"), "missing mqtt port error in: {msg}");
    }

    // -- Load -------------------------------------------------------------

    #[test]
    fn load_missing_file_gives_defaults() {
        let cfg = load("/nonexistent/kebon-hub.toml").unwrap();
        assert_eq!(cfg.web.port, 3000);
    }

    #[test]
    fn load_reads_and_rejects_malformed_files() {
        let dir = std::env::temp_dir();
        let good = dir.join(format!("kebon-hub-good-{}.toml", std::process::id()));
        let bad = dir.join(format!("kebon-hub-bad-{}.toml", std::process::id()));
        std::fs::write(&good, "[web]\nport = 3100\n").unwrap();
        std::fs::write(&bad, "[web\nport = ").unwrap();

        let cfg = load(good.to_str().unwrap()).unwrap();
        assert_eq!(cfg.web.port, 3100);
        let err = load(bad.to_str().unwrap()).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config"));

        let _ = std::fs::remove_file(good);
        let _ = std::fs::remove_file(bad);
    }
}
