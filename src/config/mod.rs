//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::clock::DEFAULT_DRIFT_WARN_THRESHOLD_MS;
use crate::game::physics::ActorClass;
use crate::game::WorldSettings;
use crate::replay::RetentionPolicy;
use crate::util::time::{SIMULATION_TPS, SNAPSHOT_TPS};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Authoritative tick rate
    pub simulation_tps: u32,
    /// World diff broadcast rate
    pub snapshot_tps: u32,

    /// Time-sync sample interval; non-positive values fall back to one second
    pub time_sync_interval_ms: i64,
    /// Serve `/timesync` without a clock when false, so callers see `Unavailable`
    pub time_sync_enabled: bool,
    /// Drift at or above this magnitude is logged as a warning
    pub drift_warn_threshold_ms: i64,

    /// Record matches under this directory
    pub replay_dir: Option<PathBuf>,
    /// Matches kept by the retention sweep; zero keeps all
    pub replay_max_matches: usize,
    /// Matches older than this are pruned; zero disables the age limit
    pub replay_max_age_hours: u64,
    pub replay_sweep_interval_secs: u64,
    pub match_seed: u64,
    pub actor_count: usize,
    pub actor_class: ActorClass,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port.trim()),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            simulation_tps: positive(
                parse_or(&lookup, "SIMULATION_TPS", SIMULATION_TPS)?,
                "SIMULATION_TPS",
            )?,
            snapshot_tps: positive(
                parse_or(&lookup, "SNAPSHOT_TPS", SNAPSHOT_TPS)?,
                "SNAPSHOT_TPS",
            )?,

            time_sync_interval_ms: parse_or(&lookup, "TIME_SYNC_INTERVAL_MS", 1_000)?,
            time_sync_enabled: parse_or(&lookup, "TIME_SYNC_ENABLED", true)?,
            drift_warn_threshold_ms: parse_or(
                &lookup,
                "DRIFT_WARN_THRESHOLD_MS",
                DEFAULT_DRIFT_WARN_THRESHOLD_MS,
            )?,

            replay_dir: lookup("REPLAY_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            replay_max_matches: parse_or(&lookup, "REPLAY_MAX_MATCHES", 0)?,
            replay_max_age_hours: parse_or(&lookup, "REPLAY_MAX_AGE_HOURS", 0)?,
            replay_sweep_interval_secs: positive(
                parse_or(&lookup, "REPLAY_SWEEP_INTERVAL_SECS", 3_600)?,
                "REPLAY_SWEEP_INTERVAL_SECS",
            )?,
            match_seed: match lookup("MATCH_SEED") {
                Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid("MATCH_SEED"))?,
                None => rand::random(),
            },
            actor_count: parse_or(&lookup, "ACTOR_COUNT", 8)?,
            actor_class: parse_or(&lookup, "ACTOR_CLASS", ActorClass::Skiff)?,
        })
    }

    /// Tick loop settings derived from this configuration
    pub fn world_settings(&self) -> WorldSettings {
        WorldSettings {
            simulation_tps: self.simulation_tps,
            snapshot_tps: self.snapshot_tps,
            match_seed: self.match_seed,
            actor_count: self.actor_count,
            actor_class: self.actor_class,
            replay_dir: self.replay_dir.clone(),
        }
    }

    /// Retention limits applied to `replay_dir`
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_matches: self.replay_max_matches,
            max_age: (self.replay_max_age_hours > 0)
                .then(|| Duration::from_secs(self.replay_max_age_hours * 60 * 60)),
        }
    }

    pub fn replay_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.replay_sweep_interval_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

fn positive<T: PartialEq + Default>(value: T, key: &'static str) -> Result<T, ConfigError> {
    if value == T::default() {
        return Err(ConfigError::Invalid(key));
    }
    Ok(value)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("MATCH_SEED", "7")]).unwrap();

        assert_eq!(config.server_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.simulation_tps, SIMULATION_TPS);
        assert_eq!(config.snapshot_tps, SNAPSHOT_TPS);
        assert_eq!(config.time_sync_interval_ms, 1_000);
        assert!(config.time_sync_enabled);
        assert_eq!(config.drift_warn_threshold_ms, DEFAULT_DRIFT_WARN_THRESHOLD_MS);
        assert!(config.replay_dir.is_none());
        assert_eq!(config.match_seed, 7);
        assert_eq!(config.actor_class, ActorClass::Skiff);
    }

    #[test]
    fn test_port_overrides_server_addr() {
        let config = load(&[("PORT", "9000"), ("SERVER_ADDR", "127.0.0.1:1")]).unwrap();
        assert_eq!(config.server_addr.port(), 9000);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("TIME_SYNC_INTERVAL_MS", "-5"),
            ("TIME_SYNC_ENABLED", "false"),
            ("REPLAY_DIR", "/tmp/replays"),
            ("ACTOR_CLASS", "hauler"),
            ("ACTOR_COUNT", "3"),
        ])
        .unwrap();

        assert_eq!(config.time_sync_interval_ms, -5);
        assert!(!config.time_sync_enabled);
        assert_eq!(config.replay_dir, Some(PathBuf::from("/tmp/replays")));

        let settings = config.world_settings();
        assert_eq!(settings.actor_class, ActorClass::Hauler);
        assert_eq!(settings.actor_count, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            load(&[("SIMULATION_TPS", "0")]),
            Err(ConfigError::Invalid("SIMULATION_TPS"))
        ));
        assert!(matches!(
            load(&[("ACTOR_CLASS", "frigate")]),
            Err(ConfigError::Invalid("ACTOR_CLASS"))
        ));
        assert!(matches!(
            load(&[("REPLAY_SWEEP_INTERVAL_SECS", "0")]),
            Err(ConfigError::Invalid("REPLAY_SWEEP_INTERVAL_SECS"))
        ));
        assert!(matches!(load(&[("SERVER_ADDR", "nowhere")]), Err(ConfigError::InvalidAddress)));
    }

    #[test]
    fn test_retention_policy() {
        let config = load(&[("MATCH_SEED", "1")]).unwrap();
        assert!(config.retention_policy().is_unbounded());
        assert_eq!(config.replay_sweep_interval(), Duration::from_secs(3_600));

        let config = load(&[
            ("REPLAY_MAX_MATCHES", "20"),
            ("REPLAY_MAX_AGE_HOURS", "48"),
            ("REPLAY_SWEEP_INTERVAL_SECS", "600"),
        ])
        .unwrap();
        let policy = config.retention_policy();
        assert_eq!(policy.max_matches, 20);
        assert_eq!(policy.max_age, Some(Duration::from_secs(48 * 60 * 60)));
        assert_eq!(config.replay_sweep_interval(), Duration::from_secs(600));
    }
}
