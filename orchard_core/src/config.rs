/// Configuration file support for ORCHARD
///
/// Runtime tunables (router address, stop grace window, staleness threshold,
/// ...) come from a TOML or YAML file found in the standard search paths,
/// falling back to built-in defaults. `ORCHARD_ROUTER` overrides the router
/// address.
use crate::communication::protocol::DEFAULT_PORT;
use crate::communication::reconnect::ReconnectStrategy;
use crate::error::{OrchardError, OrchardResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ROUTER_ENV: &str = "ORCHARD_ROUTER";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl RouterConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Fixed wait between connection attempts
    pub backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { backoff_ms: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// A heartbeat older than this reads as WAITING
    pub stale_after_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Time between the interrupt and the forced terminate
    pub grace_ms: u64,
    /// Directory of per-node logs, `~/.orchard/logs` when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_ms: 1000,
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// Sleep between empty polls; 0 only yields to the scheduler
    pub poll_interval_ms: u64,
    /// How long a cancelled loop waits for the running handler
    pub cancel_grace_ms: u64,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 0,
            cancel_grace_ms: 1000,
        }
    }
}

/// Full ORCHARD configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchardConfig {
    pub router: RouterConfig,
    pub reconnect: ReconnectConfig,
    pub health: HealthConfig,
    pub supervisor: SupervisorConfig,
    pub subscription: SubscriptionConfig,
}

impl OrchardConfig {
    /// Load config from a file (auto-detect format)
    pub fn from_file<P: AsRef<Path>>(path: P) -> OrchardResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| OrchardError::config(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str());
        match extension {
            Some("toml") => Self::from_toml(&contents),
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            _ => Self::from_toml(&contents).or_else(|_| Self::from_yaml(&contents)),
        }
    }

    pub fn from_toml(contents: &str) -> OrchardResult<Self> {
        toml::from_str(contents)
            .map_err(|e| OrchardError::config(format!("Failed to parse TOML: {}", e)))
    }

    pub fn from_yaml(contents: &str) -> OrchardResult<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| OrchardError::config(format!("Failed to parse YAML: {}", e)))
    }

    /// Find and load config file from standard search paths
    ///
    /// Search order:
    /// 1. ./orchard.toml or ./orchard.yaml
    /// 2. ~/.orchard/config.toml or ~/.orchard/config.yaml
    /// 3. /etc/orchard/config.toml or /etc/orchard/config.yaml
    pub fn find_and_load() -> OrchardResult<Self> {
        for path in Self::get_search_paths() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(OrchardError::config(
            "No config file found in standard locations",
        ))
    }

    /// Explicit file if given, else the search paths, else defaults;
    /// the environment override is applied last
    pub fn load(explicit: Option<&Path>) -> OrchardResult<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => Self::find_and_load().unwrap_or_default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn get_search_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("orchard.toml"),
            PathBuf::from("orchard.yaml"),
            PathBuf::from("orchard.yml"),
        ];

        if let Some(home) = dirs::home_dir() {
            let orchard_dir = home.join(".orchard");
            paths.push(orchard_dir.join("config.toml"));
            paths.push(orchard_dir.join("config.yaml"));
        }

        paths.push(PathBuf::from("/etc/orchard/config.toml"));
        paths.push(PathBuf::from("/etc/orchard/config.yaml"));
        paths
    }

    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var(ROUTER_ENV) {
            self.apply_router_override(&value);
        }
    }

    /// `host:port` or bare `host`
    fn apply_router_override(&mut self, value: &str) {
        match value.rsplit_once(':') {
            Some((host, port)) => {
                if let Ok(port) = port.parse() {
                    self.router.host = host.to_string();
                    self.router.port = port;
                } else {
                    tracing::warn!("Ignoring malformed {}={}", ROUTER_ENV, value);
                }
            }
            None if !value.is_empty() => self.router.host = value.to_string(),
            None => {}
        }
    }

    pub fn reconnect_strategy(&self) -> ReconnectStrategy {
        ReconnectStrategy::fixed(Duration::from_millis(self.reconnect.backoff_ms))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.health.stale_after_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.supervisor.grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.subscription.poll_interval_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.subscription.cancel_grace_ms)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.supervisor.log_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(".orchard")
                .join("logs")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchardConfig::default();
        assert_eq!(config.router.addr(), "127.0.0.1:7777");
        assert_eq!(config.stale_after(), Duration::from_secs(5));
        assert_eq!(config.grace(), Duration::from_secs(1));
        assert!(config.poll_interval().is_zero());
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            [router]
            port = 9000

            [supervisor]
            grace_ms = 250
            log_dir = "/tmp/orchard-logs"
        "#;

        let config = OrchardConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.router.addr(), "127.0.0.1:9000");
        assert_eq!(config.grace(), Duration::from_millis(250));
        assert_eq!(config.log_dir(), PathBuf::from("/tmp/orchard-logs"));
        assert_eq!(config.health, HealthConfig::default());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml_str = r#"
            health:
              stale_after_ms: 2000
            subscription:
              poll_interval_ms: 1
        "#;

        let config = OrchardConfig::from_yaml(yaml_str).unwrap();
        assert_eq!(config.stale_after(), Duration::from_secs(2));
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_from_file_detects_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orchard.yaml");
        std::fs::write(&path, "router:\n  host: broker.local\n").unwrap();

        let config = OrchardConfig::from_file(&path).unwrap();
        assert_eq!(config.router.host, "broker.local");
    }

    #[test]
    fn test_router_override() {
        let mut config = OrchardConfig::default();
        config.apply_router_override("10.0.0.2:7000");
        assert_eq!(config.router.addr(), "10.0.0.2:7000");

        config.apply_router_override("broker");
        assert_eq!(config.router.addr(), "broker:7000");

        config.apply_router_override("broker:notaport");
        assert_eq!(config.router.addr(), "broker:7000");
    }
}
