//! Fleet file (`robokit.toml`) loading.
//!
//! ```toml
//! auto_run = true
//!
//! [api]
//! port = 3000
//!
//! [[robots]]
//! name = "bench"
//! blink = { device = "status", period_ms = 500 }
//!
//! [[robots.connections]]
//! name = "gpio"
//! port = "/dev/sim0"
//!
//! [[robots.devices]]
//! name = "status"
//! driver = "led"
//! pin = "13"
//! ```

use std::path::Path;

use robokit_cockpit::ApiConfig;
use robokit_types::BotError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetConfig {
    /// Hold the fleet open until interrupted. When `false` the fleet is
    /// started and immediately stopped again, which checks that every
    /// connection and device comes up.
    #[serde(default = "default_auto_run")]
    pub auto_run: bool,

    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub robots: Vec<RobotConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotConfig {
    /// Empty means a generated `Robot-NNNN` name.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,

    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blink: Option<BlinkConfig>,
}

/// A simulated connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub name: String,

    pub driver: DriverKind,

    /// Connection to attach to; the robot's first connection if omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    /// Required by `led` and `button`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,

    /// Button poll interval.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Led,
    Button,
    /// A device whose only command, `echo`, returns its arguments.
    Echo,
}

/// Toggle an LED on a fixed period while the robot runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlinkConfig {
    pub device: String,
    #[serde(default = "default_blink_period_ms")]
    pub period_ms: u64,
}

fn default_auto_run() -> bool {
    true
}
fn default_blink_period_ms() -> u64 {
    1000
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            auto_run: default_auto_run(),
            api: ApiConfig::default(),
            robots: Vec::new(),
        }
    }
}

impl FleetConfig {
    pub fn from_toml(raw: &str) -> Result<Self, BotError> {
        toml::from_str(raw).map_err(|e| BotError::Config(format!("invalid fleet file: {e}")))
    }

    /// Load the fleet file at `path`.  Returns `None` if the file does not
    /// exist. `ROBOKIT_HOST`/`ROBOKIT_PORT` are applied to the `[api]` table.
    pub fn load_from(path: &Path) -> Result<Option<Self>, BotError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BotError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut cfg = Self::from_toml(&raw)?;
        cfg.api.apply_env_overrides();
        Ok(Some(cfg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLEET: &str = r#"
        auto_run = false

        [api]
        host = "127.0.0.1"
        username = "ops"
        password = "s3cret"

        [[robots]]
        name = "bench"
        blink = { device = "status" }

        [[robots.connections]]
        name = "gpio"
        port = "/dev/sim0"

        [[robots.devices]]
        name = "status"
        driver = "led"
        pin = "13"

        [[robots.devices]]
        driver = "button"
        connection = "gpio"
        pin = "2"
        interval_ms = 5
    "#;

    #[test]
    fn parses_a_fleet() {
        let cfg = FleetConfig::from_toml(FLEET).unwrap();
        assert!(!cfg.auto_run);
        assert_eq!(cfg.api.host, "127.0.0.1");
        assert_eq!(cfg.api.port, 3000);

        let robot = &cfg.robots[0];
        assert_eq!(robot.connections[0].port.as_deref(), Some("/dev/sim0"));
        assert_eq!(robot.devices[0].driver, DriverKind::Led);
        assert_eq!(robot.devices[0].connection, None);
        assert_eq!(robot.devices[1].name, "");
        assert_eq!(robot.devices[1].interval_ms, Some(5));
        assert_eq!(
            robot.blink,
            Some(BlinkConfig {
                device: "status".into(),
                period_ms: 1000
            })
        );
    }

    #[test]
    fn empty_file_is_an_empty_fleet() {
        let cfg = FleetConfig::from_toml("").unwrap();
        assert_eq!(cfg, FleetConfig::default());
        assert!(cfg.auto_run);
    }

    #[test]
    fn unknown_driver_is_rejected() {
        let err = FleetConfig::from_toml(
            r#"
            [[robots]]
            [[robots.devices]]
            driver = "servo"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, BotError::Config(msg) if msg.contains("servo")));
    }

    #[test]
    fn debug_output_redacts_api_password() {
        let cfg = FleetConfig::from_toml(FLEET).unwrap();
        let text = format!("{cfg:?}");
        assert!(!text.contains("s3cret"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FleetConfig::load_from(&dir.path().join("robokit.toml")).unwrap().is_none());
    }

    #[test]
    fn load_from_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("robokit.toml");
        std::fs::write(&path, FLEET).unwrap();

        let cfg = FleetConfig::load_from(&path).unwrap().unwrap();
        assert_eq!(cfg.robots.len(), 1);
        assert_eq!(cfg.robots[0].devices.len(), 2);
    }
}
