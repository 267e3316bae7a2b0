use hostel_core::pipeline::{FRAME_DELAY, MIN_DETECTION_CONFIDENCE};
use hostel_core::{MatchPolicy, DEFAULT_TOLERANCE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration: defaults, then the optional TOML file named by
/// `HOSTELGATE_CONFIG`, then `HOSTELGATE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory for unknown-visitor snapshots.
    pub visitor_dir: PathBuf,
    /// JSON-lines feed (file or named pipe) for the entry camera.
    pub entry_feed: PathBuf,
    /// JSON-lines feed for the exit camera.
    pub exit_feed: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub tolerance: f32,
    pub match_policy: MatchPolicy,
    /// Detector confidence floor.
    pub min_detection_confidence: f32,
    /// Pause between frames.
    pub frame_delay: Duration,
    /// Whether unmatched faces are saved as visitor snapshots.
    pub save_visitors: bool,
    /// Serve on the session bus (development) instead of the system bus.
    pub session_bus: bool,
}

/// Keys accepted in the TOML file. All optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    visitor_dir: Option<PathBuf>,
    entry_feed: Option<PathBuf>,
    exit_feed: Option<PathBuf>,
    tolerance: Option<f32>,
    match_policy: Option<MatchPolicy>,
    min_detection_confidence: Option<f32>,
    frame_delay_ms: Option<u64>,
    save_visitors: Option<bool>,
    session_bus: Option<bool>,
}

impl Config {
    /// Load from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("HOSTELGATE_CONFIG") {
            Ok(path) => Some(read_file(Path::new(&path))?),
            Err(_) => None,
        };
        Ok(Self::resolve(file.unwrap_or_default(), |key| std::env::var(key).ok()))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("hostelgate");

        let path = |key: &str, from_file: Option<PathBuf>, default: PathBuf| {
            env(key).map(PathBuf::from).or(from_file).unwrap_or(default)
        };

        let match_policy = env("HOSTELGATE_MATCH_POLICY")
            .and_then(|v| match v.parse() {
                Ok(policy) => Some(policy),
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring HOSTELGATE_MATCH_POLICY");
                    None
                }
            })
            .or(file.match_policy)
            .unwrap_or_default();

        Self {
            db_path: path("HOSTELGATE_DB_PATH", file.db_path, data_dir.join("hostel.db")),
            visitor_dir: path(
                "HOSTELGATE_VISITOR_DIR",
                file.visitor_dir,
                data_dir.join("unknown_entries"),
            ),
            entry_feed: path(
                "HOSTELGATE_ENTRY_FEED",
                file.entry_feed,
                PathBuf::from("/run/hostelgate/entry.jsonl"),
            ),
            exit_feed: path(
                "HOSTELGATE_EXIT_FEED",
                file.exit_feed,
                PathBuf::from("/run/hostelgate/exit.jsonl"),
            ),
            tolerance: checked(
                "tolerance",
                parse_env(&env, "HOSTELGATE_TOLERANCE").or(file.tolerance),
                |t| t.is_finite() && t >= 0.0,
                DEFAULT_TOLERANCE,
            ),
            match_policy,
            min_detection_confidence: checked(
                "min_detection_confidence",
                parse_env(&env, "HOSTELGATE_MIN_CONFIDENCE").or(file.min_detection_confidence),
                |c| (0.0..=1.0).contains(&c),
                MIN_DETECTION_CONFIDENCE,
            ),
            frame_delay: parse_env(&env, "HOSTELGATE_FRAME_DELAY_MS")
                .or(file.frame_delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(FRAME_DELAY),
            save_visitors: env("HOSTELGATE_SAVE_VISITORS")
                .map(|v| v != "0")
                .or(file.save_visitors)
                .unwrap_or(true),
            session_bus: env("HOSTELGATE_SESSION_BUS").is_some() || file.session_bus.unwrap_or(false),
        }
    }
}

fn parse_env<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.parse().ok())
}

/// Keep `value` if it passes `valid`, otherwise warn and use `default`.
fn checked(key: &str, value: Option<f32>, valid: impl Fn(f32) -> bool, default: f32) -> f32 {
    match value {
        Some(v) if valid(v) => v,
        Some(v) => {
            tracing::warn!(key, value = v, default, "ignoring out-of-range setting");
            default
        }
        None => default,
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(FileConfig::default(), env_of(&[("HOME", "/home/warden")]));
        assert_eq!(
            config.db_path,
            PathBuf::from("/home/warden/.local/share/hostelgate/hostel.db")
        );
        assert_eq!(
            config.visitor_dir,
            PathBuf::from("/home/warden/.local/share/hostelgate/unknown_entries")
        );
        assert_eq!(config.tolerance, 0.5);
        assert_eq!(config.match_policy, MatchPolicy::First);
        assert_eq!(config.min_detection_confidence, 0.7);
        assert_eq!(config.frame_delay, Duration::from_millis(100));
        assert!(config.save_visitors);
        assert!(!config.session_bus);
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            tolerance = 0.45
            match_policy = "closest"
            frame_delay_ms = 250
            db_path = "/srv/hostel.db"
            "#,
        )
        .unwrap();
        let config = Config::resolve(
            file,
            env_of(&[
                ("HOSTELGATE_TOLERANCE", "0.6"),
                ("HOSTELGATE_SAVE_VISITORS", "0"),
                ("HOSTELGATE_SESSION_BUS", "1"),
            ]),
        );
        assert_eq!(config.tolerance, 0.6);
        assert_eq!(config.match_policy, MatchPolicy::Closest);
        assert_eq!(config.frame_delay, Duration::from_millis(250));
        assert_eq!(config.db_path, PathBuf::from("/srv/hostel.db"));
        assert!(!config.save_visitors);
        assert!(config.session_bus);
    }

    #[test]
    fn test_bad_policy_falls_back() {
        let config = Config::resolve(
            FileConfig::default(),
            env_of(&[("HOSTELGATE_MATCH_POLICY", "best")]),
        );
        assert_eq!(config.match_policy, MatchPolicy::First);
    }

    #[test]
    fn test_out_of_range_numbers_fall_back() {
        let config = Config::resolve(
            FileConfig::default(),
            env_of(&[
                ("HOSTELGATE_TOLERANCE", "-0.2"),
                ("HOSTELGATE_MIN_CONFIDENCE", "1.5"),
            ]),
        );
        assert_eq!(config.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(config.min_detection_confidence, MIN_DETECTION_CONFIDENCE);

        let config = Config::resolve(
            FileConfig::default(),
            env_of(&[("HOSTELGATE_TOLERANCE", "NaN")]),
        );
        assert_eq!(config.tolerance, DEFAULT_TOLERANCE);

        let file: FileConfig = toml::from_str("tolerance = -1.0").unwrap();
        assert_eq!(Config::resolve(file, env_of(&[])).tolerance, DEFAULT_TOLERANCE);
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("camera = \"/dev/video0\"").is_err());
    }
}
