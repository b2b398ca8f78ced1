//! Configuration management for the X32 bridge
//!
//! Handles loading, parsing, and hot-reloading of YAML configuration files.
//! A reload never patches a running session: the bridge builds a new one.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::fs;

use crate::actions::Action;
use crate::discovery::DEFAULT_DEVICE_TTL;
use crate::load::{DEFAULT_LOAD_CONCURRENCY, DEFAULT_LOAD_TIMEOUT_MS};
use crate::osc::X32_OSC_PORT;
use crate::session::batcher::{DEFAULT_DEBOUNCE_MS, DEFAULT_MAX_WAIT_MS};
use crate::session::SessionConfig;
use crate::transitions::{Easing, DEFAULT_FPS, MAX_FPS, MIN_FPS};

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub console: ConsoleConfig,
    #[serde(default)]
    pub fades: FadeConfig,
    #[serde(default)]
    pub loads: LoadConfig,
    #[serde(default)]
    pub invalidation: InvalidationConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Surface controls by id
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub controls: HashMap<String, ControlMapping>,
}

/// Where the console lives
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsoleConfig {
    pub host: String,
    #[serde(default = "default_console_port")]
    pub port: u16,
}

/// Fade engine settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FadeConfig {
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default)]
    pub easing: Easing,
}

/// Load queue settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoadConfig {
    #[serde(default = "default_load_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_load_timeout_ms")]
    pub timeout_ms: u64,
    /// Retry loads for subscribed-but-unknown addresses this often (0 = off)
    #[serde(default = "default_resync_interval_ms")]
    pub resync_interval_ms: u64,
}

/// Feedback invalidation debounce settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InvalidationConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Address suffixes whose change means display names moved
    #[serde(default = "default_name_suffixes")]
    pub name_suffixes: Vec<String>,
}

/// Connection supervision
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Renew the console's change-notification subscription this often
    #[serde(default = "default_xremote_interval_ms")]
    pub xremote_interval_ms: u64,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    /// Reconnect when nothing has been heard for this long
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

/// Console discovery
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_device_ttl_secs")]
    pub device_ttl_secs: u64,
    #[serde(default = "default_broadcast_addr")]
    pub broadcast_addr: String,
}

/// What a surface control does on press and release
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlMapping {
    pub press: ActionSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<ActionSpec>,
}

/// An action name plus its raw options
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionSpec {
    pub action: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

impl ActionSpec {
    pub fn parse(&self) -> Result<Action, crate::actions::OptionError> {
        Action::parse(&self.action, &self.options)
    }
}

impl Default for FadeConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            easing: Easing::default(),
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            concurrency: default_load_concurrency(),
            timeout_ms: default_load_timeout_ms(),
            resync_interval_ms: default_resync_interval_ms(),
        }
    }
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_wait_ms: default_max_wait_ms(),
            name_suffixes: default_name_suffixes(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            xremote_interval_ms: default_xremote_interval_ms(),
            heartbeat_ms: default_heartbeat_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            device_ttl_secs: default_device_ttl_secs(),
            broadcast_addr: default_broadcast_addr(),
        }
    }
}

impl DiscoveryConfig {
    pub fn device_ttl(&self) -> Duration {
        Duration::from_secs(self.device_ttl_secs)
    }

    pub fn broadcast(&self) -> Result<IpAddr> {
        self.broadcast_addr.parse().with_context(|| {
            format!(
                "discovery.broadcast_addr '{}' is not an IP address",
                self.broadcast_addr
            )
        })
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_yaml(&contents).with_context(|| format!("Invalid config file: {}", path))
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Minimal config pointing at one console, everything else defaulted
    pub fn for_host(host: impl Into<String>) -> Self {
        Self {
            console: ConsoleConfig {
                host: host.into(),
                port: default_console_port(),
            },
            fades: FadeConfig::default(),
            loads: LoadConfig::default(),
            invalidation: InvalidationConfig::default(),
            connection: ConnectionConfig::default(),
            discovery: DiscoveryConfig::default(),
            controls: HashMap::new(),
        }
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.console.host.trim().is_empty() {
            anyhow::bail!("console.host cannot be empty");
        }
        if self.console.port == 0 {
            anyhow::bail!("console.port cannot be 0");
        }

        if !(MIN_FPS..=MAX_FPS).contains(&self.fades.fps) {
            anyhow::bail!(
                "fades.fps {} is out of range (must be {}-{})",
                self.fades.fps,
                MIN_FPS,
                MAX_FPS
            );
        }

        if self.loads.concurrency == 0 {
            anyhow::bail!("loads.concurrency must be at least 1");
        }
        if self.loads.timeout_ms == 0 {
            anyhow::bail!("loads.timeout_ms must be greater than 0");
        }

        if self.invalidation.max_wait_ms < self.invalidation.debounce_ms {
            anyhow::bail!(
                "invalidation.max_wait_ms ({}) must be >= debounce_ms ({})",
                self.invalidation.max_wait_ms,
                self.invalidation.debounce_ms
            );
        }

        let conn = &self.connection;
        if conn.heartbeat_ms == 0 || conn.xremote_interval_ms == 0 {
            anyhow::bail!("connection intervals must be greater than 0");
        }
        if conn.heartbeat_timeout_ms <= conn.heartbeat_ms {
            anyhow::bail!(
                "connection.heartbeat_timeout_ms ({}) must exceed heartbeat_ms ({})",
                conn.heartbeat_timeout_ms,
                conn.heartbeat_ms
            );
        }
        if conn.reconnect_initial_ms == 0 || conn.reconnect_max_ms < conn.reconnect_initial_ms {
            anyhow::bail!("connection reconnect backoff is invalid");
        }

        if self.discovery.device_ttl_secs == 0 {
            anyhow::bail!("discovery.device_ttl_secs must be greater than 0");
        }
        self.discovery.broadcast()?;

        // Actions are typed once here; bad options fail the load
        for (control_id, mapping) in &self.controls {
            if control_id.is_empty() {
                anyhow::bail!("Control id cannot be empty");
            }
            mapping
                .press
                .parse()
                .with_context(|| format!("Invalid press action for control '{}'", control_id))?;
            if let Some(release) = &mapping.release {
                release.parse().with_context(|| {
                    format!("Invalid release action for control '{}'", control_id)
                })?;
            }
        }

        Ok(())
    }

    /// Settings the session actor is built from
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            fade_fps: self.fades.fps,
            easing: self.fades.easing,
            load_concurrency: self.loads.concurrency,
            load_timeout: Duration::from_millis(self.loads.timeout_ms),
            invalidation_window: Duration::from_millis(self.invalidation.debounce_ms),
            invalidation_max_wait: Duration::from_millis(self.invalidation.max_wait_ms),
            name_suffixes: self.invalidation.name_suffixes.clone(),
        }
    }
}

// Default value functions
fn default_console_port() -> u16 { X32_OSC_PORT }
fn default_fps() -> u32 { DEFAULT_FPS }
fn default_load_concurrency() -> usize { DEFAULT_LOAD_CONCURRENCY }
fn default_load_timeout_ms() -> u64 { DEFAULT_LOAD_TIMEOUT_MS }
fn default_resync_interval_ms() -> u64 { 10_000 }
fn default_debounce_ms() -> u64 { DEFAULT_DEBOUNCE_MS }
fn default_max_wait_ms() -> u64 { DEFAULT_MAX_WAIT_MS }
fn default_name_suffixes() -> Vec<String> { vec!["/config/name".to_string()] }
fn default_xremote_interval_ms() -> u64 { 9_000 }
fn default_heartbeat_ms() -> u64 { 1_500 }
fn default_heartbeat_timeout_ms() -> u64 { 5_000 }
fn default_reconnect_initial_ms() -> u64 { 1_000 }
fn default_reconnect_max_ms() -> u64 { 30_000 }
fn default_device_ttl_secs() -> u64 { DEFAULT_DEVICE_TTL.as_secs() }
fn default_broadcast_addr() -> String { "255.255.255.255".to_string() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = AppConfig::from_yaml("console:\n  host: 192.168.1.50\n").unwrap();

        assert_eq!(config.console.port, 10023);
        assert_eq!(config.fades.fps, 10);
        assert_eq!(config.fades.easing, Easing::Linear);
        assert_eq!(config.loads.concurrency, 20);
        assert_eq!(config.loads.timeout_ms, 500);
        assert_eq!(config.invalidation.debounce_ms, 100);
        assert_eq!(config.invalidation.max_wait_ms, 500);
        assert_eq!(config.invalidation.name_suffixes, vec!["/config/name"]);
        assert_eq!(config.discovery.device_ttl_secs, 60);
        assert!(config.controls.is_empty());
    }

    #[test]
    fn test_fps_out_of_range_rejected() {
        let yaml = "console:\n  host: x32.local\nfades:\n  fps: 120\n";
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(format!("{:#}", err).contains("fades.fps"));
    }

    #[test]
    fn test_empty_host_rejected() {
        assert!(AppConfig::from_yaml("console:\n  host: \"\"\n").is_err());
    }

    #[test]
    fn test_controls_are_typed_at_load() {
        let yaml = r#"
console:
  host: 10.0.0.5
fades:
  fps: 20
  easing: cubic_in_out
controls:
  dip1:
    press:
      action: fader_store
      options: { target: "/ch/01", delta_db: -20, fade_ms: 300 }
    release:
      action: fader_restore
      options: { target: "/ch/01", fade_ms: 300 }
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.fades.easing, Easing::CubicInOut);
        assert!(config.controls["dip1"].release.is_some());

        let bad = r#"
console:
  host: 10.0.0.5
controls:
  broken:
    press:
      action: fader_set
      options: { target: "/ch/01", level_db: "loud" }
"#;
        let err = AppConfig::from_yaml(bad).unwrap_err();
        assert!(format!("{:#}", err).contains("broken"));
    }

    #[test]
    fn test_session_config_mapping() {
        let mut config = AppConfig::for_host("x32");
        config.fades.fps = 25;
        config.loads.timeout_ms = 750;

        let session = config.session_config();
        assert_eq!(session.fade_fps, 25);
        assert_eq!(session.load_timeout, Duration::from_millis(750));
        assert_eq!(session.load_concurrency, 20);
    }

    #[test]
    fn test_discovery_section() {
        let yaml = "console:\n  host: x32\ndiscovery:\n  device_ttl_secs: 15\n  broadcast_addr: 192.168.1.255\n";
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.discovery.device_ttl(), Duration::from_secs(15));
        assert_eq!(
            config.discovery.broadcast().unwrap(),
            "192.168.1.255".parse::<IpAddr>().unwrap()
        );

        let bad = "console:\n  host: x32\ndiscovery:\n  broadcast_addr: everyone\n";
        let err = AppConfig::from_yaml(bad).unwrap_err();
        assert!(format!("{:#}", err).contains("broadcast_addr"));

        let zero = "console:\n  host: x32\ndiscovery:\n  device_ttl_secs: 0\n";
        assert!(AppConfig::from_yaml(zero).is_err());
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bridge.yaml");
        std::fs::write(&path, "console:\n  host: 127.0.0.1\n  port: 10024\n").unwrap();

        let config = AppConfig::load(&path.to_string_lossy()).await.unwrap();
        assert_eq!(config.console.port, 10024);

        let missing = AppConfig::load("/definitely/not/here.yaml").await;
        assert!(missing.is_err());
    }
}
