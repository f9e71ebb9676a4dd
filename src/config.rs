//! Application-level configuration loading, including scoring constants and
//! the promotion retry policy.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use time::UtcOffset;
use tracing::{info, warn};

/// Default location on disk where the worker looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TAG_RALLY_BACK_CONFIG_PATH";

/// Points awarded for starting a new daily chain with a root tag.
const DEFAULT_NEW_CHAIN_POINTS: i32 = 5;
/// Points awarded for a reply posted the same calendar day as its root.
const DEFAULT_ON_TIME_POINTS: i32 = 3;
/// Points awarded for a reply posted on a later calendar day.
const DEFAULT_LATE_POINTS: i32 = 1;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Point values used by the score calculator.
    pub score: ScoreConfig,
    /// Offset in which posting days are delimited (midnight boundaries).
    pub chain_offset: UtcOffset,
    /// Retry policy for promotion job execution.
    pub scheduler: SchedulerConfig,
}

/// Point values assigned to tags by chain position and timing.
#[derive(Debug, Clone, Copy)]
pub struct ScoreConfig {
    /// Fixed award for a root tag opening a new chain.
    pub new_chain_points: i32,
    /// Award for a subtag posted within its root's posting day.
    pub on_time_points: i32,
    /// Base award for a subtag posted after its root's posting day.
    pub late_points: i32,
}

/// Bounded retry policy applied when a promotion job handler fails.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Attempts before a job is left unresolved and escalated.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Ceiling for the exponential backoff.
    pub max_backoff: Duration,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to baked-in
    /// defaults when the file is absent or malformed.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(path = %path.display(), "loaded configuration");
                    config
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
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            score: ScoreConfig::default(),
            chain_offset: UtcOffset::UTC,
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            new_chain_points: DEFAULT_NEW_CHAIN_POINTS,
            on_time_points: DEFAULT_ON_TIME_POINTS,
            late_points: DEFAULT_LATE_POINTS,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    score: RawScore,
    /// Whole hours east of UTC in which posting days roll over.
    #[serde(default)]
    timezone_offset_hours: i8,
    #[serde(default)]
    scheduler: RawScheduler,
}

#[derive(Debug, Deserialize)]
struct RawScore {
    new_chain_points: Option<i32>,
    on_time_points: Option<i32>,
    late_points: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct RawScheduler {
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

impl Default for RawScore {
    fn default() -> Self {
        Self {
            new_chain_points: None,
            on_time_points: None,
            late_points: None,
        }
    }
}

impl Default for RawScheduler {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_backoff_ms: None,
            max_backoff_ms: None,
        }
    }
}

impl From<RawConfig> for AppConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = ScoreConfig::default();
        let scheduler_defaults = SchedulerConfig::default();

        let chain_offset = match UtcOffset::from_hms(raw.timezone_offset_hours, 0, 0) {
            Ok(offset) => offset,
            Err(err) => {
                warn!(
                    hours = raw.timezone_offset_hours,
                    error = %err,
                    "invalid timezone offset in config; using UTC"
                );
                UtcOffset::UTC
            }
        };

        Self {
            score: ScoreConfig {
                new_chain_points: raw.score.new_chain_points.unwrap_or(defaults.new_chain_points),
                on_time_points: raw.score.on_time_points.unwrap_or(defaults.on_time_points),
                late_points: raw.score.late_points.unwrap_or(defaults.late_points),
            },
            chain_offset,
            scheduler: SchedulerConfig {
                max_attempts: raw
                    .scheduler
                    .max_attempts
                    .unwrap_or(scheduler_defaults.max_attempts),
                initial_backoff: raw
                    .scheduler
                    .initial_backoff_ms
                    .map(Duration::from_millis)
                    .unwrap_or(scheduler_defaults.initial_backoff),
                max_backoff: raw
                    .scheduler
                    .max_backoff_ms
                    .map(Duration::from_millis)
                    .unwrap_or(scheduler_defaults.max_backoff),
            },
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
