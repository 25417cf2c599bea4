//! Orchestrator configuration.
//!
//! Values come from three layers, strongest last: built-in defaults,
//! `$SAMAY_HOME/config.toml`, then programmatic [`ConfigOverrides`] (the
//! cli maps `-c key=value` style flags onto these).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;
use crate::error::SamayErr;
use crate::service_descriptor::ServiceDescriptorOverride;

pub const SAMAY_HOME_ENV_VAR: &str = "SAMAY_HOME";

const DEFAULT_TAB_READY_GRACE_MS: u64 = 10_000;
const DEFAULT_SESSION_GC_GRACE_MS: u64 = 30_000;
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
const DEFAULT_HEARTBEAT_MISSES: u32 = 2;

#[derive(Debug, Clone)]
pub struct Config {
    pub samay_home: PathBuf,

    /// Identifier advertised in `extension-pong` / `extension-ready`.
    pub extension_id: String,

    /// How long to wait for a tab's document to reach the `complete`
    /// ready-state before proceeding anyway.
    pub tab_ready_grace: Duration,

    /// How long a finished session stays queryable before it is
    /// garbage-collected.
    pub session_gc_grace: Duration,

    /// Relay-to-orchestrator ping cadence.
    pub heartbeat_interval: Duration,

    /// Consecutive unanswered pings before the relay reports the
    /// extension as disconnected.
    pub heartbeat_misses_before_disconnect: u32,

    /// Per-service descriptor patches.
    pub service_overrides: HashMap<String, ServiceDescriptorOverride>,
}

/// Optional fields from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigToml {
    extension_id: Option<String>,
    tab_ready_grace_ms: Option<u64>,
    session_gc_grace_ms: Option<u64>,
    heartbeat_interval_ms: Option<u64>,
    heartbeat_misses_before_disconnect: Option<u32>,
    #[serde(default)]
    services: HashMap<String, ServiceDescriptorOverride>,
}

/// Programmatic overrides; every field beats the config file when set.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub samay_home: Option<PathBuf>,
    pub extension_id: Option<String>,
    pub tab_ready_grace: Option<Duration>,
    pub session_gc_grace: Option<Duration>,
    pub heartbeat_interval: Option<Duration>,
    pub heartbeat_misses_before_disconnect: Option<u32>,
}

impl Config {
    /// Load `$SAMAY_HOME/config.toml` (if present) and fold in overrides.
    pub fn load_with_overrides(overrides: ConfigOverrides) -> Result<Self> {
        let samay_home = overrides
            .samay_home
            .clone()
            .unwrap_or_else(find_samay_home);

        let config_path = samay_home.join("config.toml");
        let file: ConfigToml = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            toml::from_str(&contents)
                .map_err(|e| SamayErr::Config(format!("{}: {e}", config_path.display())))?
        } else {
            ConfigToml::default()
        };

        Ok(Self {
            samay_home,
            extension_id: overrides
                .extension_id
                .or(file.extension_id)
                .unwrap_or_else(|| "samay-extension".to_string()),
            tab_ready_grace: overrides.tab_ready_grace.unwrap_or_else(|| {
                Duration::from_millis(
                    file.tab_ready_grace_ms.unwrap_or(DEFAULT_TAB_READY_GRACE_MS),
                )
            }),
            session_gc_grace: overrides.session_gc_grace.unwrap_or_else(|| {
                Duration::from_millis(
                    file.session_gc_grace_ms.unwrap_or(DEFAULT_SESSION_GC_GRACE_MS),
                )
            }),
            heartbeat_interval: overrides.heartbeat_interval.unwrap_or_else(|| {
                Duration::from_millis(
                    file.heartbeat_interval_ms
                        .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS),
                )
            }),
            heartbeat_misses_before_disconnect: overrides
                .heartbeat_misses_before_disconnect
                .or(file.heartbeat_misses_before_disconnect)
                .unwrap_or(DEFAULT_HEARTBEAT_MISSES),
            service_overrides: file.services,
        })
    }

    pub fn load_default() -> Result<Self> {
        Self::load_with_overrides(ConfigOverrides::default())
    }
}

fn find_samay_home() -> PathBuf {
    if let Ok(home) = std::env::var(SAMAY_HOME_ENV_VAR)
        && !home.is_empty()
    {
        return PathBuf::from(home);
    }
    let mut home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.push(".samay");
    home
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn defaults_without_config_file() {
        let home = TempDir::new().expect("tempdir");
        let config = Config::load_with_overrides(ConfigOverrides {
            samay_home: Some(home.path().to_path_buf()),
            ..Default::default()
        })
        .expect("load");
        assert_eq!(config.extension_id, "samay-extension");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.heartbeat_misses_before_disconnect, 2);
        assert!(config.service_overrides.is_empty());
    }

    #[test]
    fn config_file_and_overrides_layering() {
        let home = TempDir::new().expect("tempdir");
        std::fs::write(
            home.path().join("config.toml"),
            r#"
extension_id = "samay-dev"
heartbeat_interval_ms = 5000

[services.claude]
per_service_timeout_ms = 45000
"#,
        )
        .expect("write config");

        let config = Config::load_with_overrides(ConfigOverrides {
            samay_home: Some(home.path().to_path_buf()),
            heartbeat_interval: Some(Duration::from_secs(1)),
            ..Default::default()
        })
        .expect("load");

        // Programmatic override beats the file; the file beats defaults.
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.extension_id, "samay-dev");
        assert_eq!(
            config
                .service_overrides
                .get("claude")
                .and_then(|o| o.per_service_timeout_ms),
            Some(45_000)
        );
    }

    #[test]
    fn malformed_config_is_an_error() {
        let home = TempDir::new().expect("tempdir");
        std::fs::write(home.path().join("config.toml"), "not = [valid").expect("write");
        let err = Config::load_with_overrides(ConfigOverrides {
            samay_home: Some(home.path().to_path_buf()),
            ..Default::default()
        });
        assert!(err.is_err());
    }
}
