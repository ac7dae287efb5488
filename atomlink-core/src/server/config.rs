//! Relay configuration.
//!
//! Values come from three layers, later ones winning:
//!
//! 1. Built-in defaults (`0.0.0.0:8080`, stats every 60 s)
//! 2. An optional YAML file (`atomlink.yaml` by default)
//! 3. Environment variables `ATOMLINK_HOST` and `ATOMLINK_PORT`

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;

/// Default config file looked up by the relay binary.
pub const DEFAULT_CONFIG_FILE: &str = "atomlink.yaml";

const HOST_VAR: &str = "ATOMLINK_HOST";
const PORT_VAR: &str = "ATOMLINK_PORT";

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    8080
}

const fn default_stats_interval_secs() -> u64 {
    60
}

/// Configuration for the relay server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelayConfig {
    /// The host address to bind to (e.g. `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: String,

    /// The TCP port to listen on. `0` picks a free port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between registry stats log lines. `0` disables them.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

impl RelayConfig {
    /// Loopback on an ephemeral port with stats disabled.
    pub fn local() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 0,
            stats_interval_secs: 0,
        }
    }

    /// Load configuration from a YAML file, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::InvalidEnv`] if an override cannot be parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Like [`RelayConfig::from_file`], but fall back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::from_file(path);
        }
        info!(path = %path.display(), "config file not found, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string. No environment overrides.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Override host and port from the process environment when set.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|var| std::env::var(var).ok())
    }

    /// Override host and port using `lookup` in place of the environment.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(HOST_VAR) {
            self.host = host;
        }
        if let Some(port) = lookup(PORT_VAR) {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv {
                    var: PORT_VAR,
                    value: port,
                })?;
        }
        Ok(())
    }

    /// `host:port` as given, for logging and binding.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_the_fixed_relay_port() {
        let config = RelayConfig::default();
        assert_eq!(config.address(), "0.0.0.0:8080");
        assert_eq!(config.stats_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn parse_fills_missing_fields_with_defaults() {
        let config = RelayConfig::parse("port: 9001\n").unwrap();
        assert_eq!(config.port, 9001);
        assert_eq!(config.host, "0.0.0.0");

        let config = RelayConfig::parse("host: 127.0.0.1\nstats_interval_secs: 0\n").unwrap();
        assert_eq!(config.stats_interval(), None);
    }

    #[test]
    fn parse_rejects_bad_yaml() {
        assert!(matches!(
            RelayConfig::parse("port: [not, a, port]"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn overrides_win_over_file_values() {
        let env: HashMap<&str, &str> =
            HashMap::from([("ATOMLINK_HOST", "10.0.0.1"), ("ATOMLINK_PORT", " 7000 ")]);
        let mut config = RelayConfig::parse("host: 0.0.0.0\nport: 8080\n").unwrap();

        config
            .apply_overrides_from(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.address(), "10.0.0.1:7000");
    }

    #[test]
    fn invalid_port_override_is_an_error() {
        let mut config = RelayConfig::default();
        let result = config.apply_overrides_from(|var| {
            (var == "ATOMLINK_PORT").then(|| "eighty".to_string())
        });

        match result {
            Err(ConfigError::InvalidEnv { var, value }) => {
                assert_eq!(var, "ATOMLINK_PORT");
                assert_eq!(value, "eighty");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let config = RelayConfig::load(Path::new("/nonexistent/atomlink.yaml")).unwrap();
        assert_eq!(config.stats_interval_secs, 60);
    }
}
