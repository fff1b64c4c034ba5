use facematch_core::{ServiceSettings, DEFAULT_MATCH_THRESHOLD};
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Euclidean distance threshold used when a match request gives none.
    pub match_threshold: f64,
    /// Model version tag recorded on detect passes that do not name one.
    pub model_version: String,
    /// Pending requests the engine thread will queue before callers wait.
    pub queue_depth: usize,
    /// Register on the system bus instead of the session bus.
    pub system_bus: bool,
}

impl Config {
    /// Load configuration from `FACEMATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facematch");

        let db_path = std::env::var("FACEMATCH_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("faces.db"));

        Self {
            db_path,
            match_threshold: env_f64("FACEMATCH_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            model_version: std::env::var("FACEMATCH_MODEL_VERSION")
                .unwrap_or_else(|_| "unknown".to_string()),
            queue_depth: env_usize("FACEMATCH_QUEUE_DEPTH", 4).max(1),
            system_bus: std::env::var("FACEMATCH_SYSTEM_BUS")
                .map(|v| v != "0")
                .unwrap_or(false),
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            default_threshold: self.match_threshold,
            model_version: self.model_version.clone(),
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
