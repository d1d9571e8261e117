//! Application-level configuration loading, including the relay hub tunables.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/relay.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "RELAY_CONFIG_PATH";
const DEFAULT_PORT: u16 = 9222;
const DEFAULT_ARCHIVE_DIR: &str = "archived";
const DEFAULT_STATIC_DIR: &str = "static";

/// Tunables of the in-memory broadcast hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Number of chunks buffered per subscriber before the publisher blocks.
    pub channel_capacity: usize,
    /// Upper bound on the size of a single fan-out chunk.
    pub chunk_size: usize,
    /// Delay between two subscriber checks while a publish waits for listeners.
    pub activation_poll_interval: Duration,
    /// Number of empty polls after which a waiting publish gives up.
    pub activation_max_polls: u32,
    /// When set, a subscriber whose channel stays full for this long is evicted
    /// instead of stalling every other subscriber of the topic.
    pub stall_timeout: Option<Duration>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 30,
            chunk_size: 2048,
            activation_poll_interval: Duration::from_secs(1),
            activation_max_polls: 600,
            stall_timeout: None,
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// TCP port the HTTP listener binds to.
    pub port: u16,
    /// Root directory receiving archived publishes.
    pub archive_dir: PathBuf,
    /// Directory served under `/static/`.
    pub static_dir: PathBuf,
    /// Broadcast hub settings.
    pub hub: HubConfig,
}

impl AppConfig {
    /// Load the configuration from disk and the environment, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    info!(path = %path.display(), "loaded relay config");
                    raw.into()
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        };
        config.apply_env_overrides();
        config
    }

    /// Environment variables win over the file.
    fn apply_env_overrides(&mut self) {
        if let Some(port) = env::var("PORT")
            .or_else(|_| env::var("SERVER_PORT"))
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
        {
            self.port = port;
        }
        if let Some(dir) = non_empty_path_var("ARCHIVE_DIR") {
            self.archive_dir = dir;
        }
        if let Some(dir) = non_empty_path_var("STATIC_DIR") {
            self.static_dir = dir;
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            archive_dir: PathBuf::from(DEFAULT_ARCHIVE_DIR),
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            hub: HubConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
///
/// Every field is optional so partial files only override what they name.
struct RawConfig {
    port: Option<u16>,
    archive_dir: Option<PathBuf>,
    static_dir: Option<PathBuf>,
    #[serde(default)]
    hub: RawHubConfig,
}

#[derive(Debug, Default, Deserialize)]
struct RawHubConfig {
    channel_capacity: Option<usize>,
    chunk_size: Option<usize>,
    activation_poll_interval_ms: Option<u64>,
    activation_max_polls: Option<u32>,
    stall_timeout_ms: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            port: value.port.unwrap_or(defaults.port),
            archive_dir: value.archive_dir.unwrap_or(defaults.archive_dir),
            static_dir: value.static_dir.unwrap_or(defaults.static_dir),
            hub: value.hub.into(),
        }
    }
}

impl From<RawHubConfig> for HubConfig {
    fn from(value: RawHubConfig) -> Self {
        let defaults = HubConfig::default();
        Self {
            // A zero-capacity channel cannot be built; clamp to one slot.
            channel_capacity: value
                .channel_capacity
                .unwrap_or(defaults.channel_capacity)
                .max(1),
            chunk_size: value.chunk_size.unwrap_or(defaults.chunk_size).max(1),
            activation_poll_interval: value
                .activation_poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.activation_poll_interval),
            activation_max_polls: value
                .activation_max_polls
                .unwrap_or(defaults.activation_max_polls),
            stall_timeout: value
                .stall_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    non_empty_path_var(CONFIG_PATH_ENV).unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn non_empty_path_var(name: &str) -> Option<PathBuf> {
    env::var_os(name)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
}
