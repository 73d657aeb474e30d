//! [`ApiConfig`] – how the HTTP API binds and who may call it.
//!
//! Read from the `[api]` table of a TOML file. Every field has a default, so
//! an empty table (or no file at all) yields a server on `0.0.0.0:3000` with
//! no authentication and no CORS headers.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use robokit_types::BotError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served below the `/api/` routes, e.g. a dashboard build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<PathBuf>,

    /// Basic-auth credentials. Auth is enabled only when both are set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default)]
    pub cors: CorsConfig,

    /// Log every request with its status and latency.
    #[serde(default)]
    pub debug: bool,
}

/// Cross-origin settings. An empty `allow_origins` disables CORS entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins with optional `*` wildcards, e.g. `http://localhost:*`.
    #[serde(default)]
    pub allow_origins: Vec<String>,

    #[serde(default = "default_cors_methods")]
    pub allow_methods: Vec<String>,

    #[serde(default = "default_cors_headers")]
    pub allow_headers: Vec<String>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_cors_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "DELETE", "OPTIONS"]
        .map(String::from)
        .to_vec()
}
fn default_cors_headers() -> Vec<String> {
    ["Origin", "X-Requested-With", "Content-Type", "Accept"]
        .map(String::from)
        .to_vec()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: None,
            username: None,
            password: None,
            cors: CorsConfig::default(),
            debug: false,
        }
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: Vec::new(),
            allow_methods: default_cors_methods(),
            allow_headers: default_cors_headers(),
        }
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("static_dir", &self.static_dir)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_some() { &"<redacted>" } else { &"<not set>" },
            )
            .field("cors", &self.cors)
            .field("debug", &self.debug)
            .finish()
    }
}

impl ApiConfig {
    /// Parse a TOML document holding the config at its top level.
    pub fn from_toml(raw: &str) -> Result<Self, BotError> {
        toml::from_str(raw).map_err(|e| BotError::Config(format!("invalid API config: {e}")))
    }

    /// Load from `path`, then apply environment overrides.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>, BotError> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BotError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut cfg = Self::from_toml(&raw)?;
        cfg.apply_env_overrides();
        Ok(Some(cfg))
    }

    /// Apply `ROBOKIT_*` environment overrides.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `ROBOKIT_HOST` | `host` |
    /// | `ROBOKIT_PORT` | `port` (ignored unless a valid port number) |
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("ROBOKIT_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("ROBOKIT_PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            self.port = port;
        }
    }

    /// `(username, password)` when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user, pass)),
            _ => None,
        }
    }

    /// The socket address to bind.
    pub fn bind_addr(&self) -> Result<SocketAddr, BotError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| BotError::Config(format!("invalid bind address {}:{}: {e}", self.host, self.port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_bind_everywhere_on_3000() {
        let cfg = ApiConfig::from_toml("").unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 3000);
        assert!(cfg.credentials().is_none());
        assert!(cfg.cors.allow_origins.is_empty());
        assert_eq!(cfg.bind_addr().unwrap(), "0.0.0.0:3000".parse().unwrap());
    }

    #[test]
    fn parses_full_table() {
        let cfg = ApiConfig::from_toml(
            r#"
            host = "127.0.0.1"
            port = 8080
            static_dir = "dashboard"
            username = "admin"
            password = "hunter2"
            debug = true

            [cors]
            allow_origins = ["http://localhost:*"]
            allow_methods = ["GET"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.credentials(), Some(("admin", "hunter2")));
        assert_eq!(cfg.cors.allow_methods, ["GET"]);
        assert_eq!(cfg.cors.allow_headers, default_cors_headers());
        assert!(cfg.debug);
    }

    #[test]
    fn debug_redacts_password() {
        let cfg = ApiConfig {
            password: Some("hunter2".into()),
            ..ApiConfig::default()
        };
        let text = format!("{cfg:?}");
        assert!(!text.contains("hunter2"));
        assert!(text.contains("<redacted>"));
    }

    #[test]
    fn overrides_replace_host_and_valid_port_only() {
        let env: HashMap<&str, &str> =
            HashMap::from([("ROBOKIT_HOST", "10.0.0.5"), ("ROBOKIT_PORT", "not-a-port")]);
        let mut cfg = ApiConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.host, "10.0.0.5");
        assert_eq!(cfg.port, 3000);

        cfg.apply_overrides(|k| (k == "ROBOKIT_PORT").then(|| "4000".to_string()));
        assert_eq!(cfg.port, 4000);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ApiConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api.toml");
        std::fs::write(&path, "port = \"three thousand\"").unwrap();

        assert!(matches!(ApiConfig::load_from(&path), Err(BotError::Config(_))));
    }
}
