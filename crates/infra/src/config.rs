//! Configuration loading and representation.
//!
//! Everything is an explicit value passed to constructors; there is no
//! process-wide session or credential state. [`AppConfig::from_env`] reads
//! `SIMFLOW_*` variables and falls back to defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use simflow_core::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://api.worldquantbrain.com";
pub const DEFAULT_CREDENTIALS_FILE: &str = "config/credentials.json";

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing configuration: {0}")]
    Missing(String),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("cannot read credentials from {}: {message}", .path.display())]
    Credentials { path: PathBuf, message: String },
}

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Upper bound on simultaneously active remote jobs
    pub max_concurrent: usize,
    /// Descriptors withdrawn from the queue per refill
    pub batch_size: usize,
    /// Sleep between loop iterations
    pub poll_interval: Duration,
    /// Age after which a non-terminal job is timed out
    pub watchdog_timeout: Duration,
    pub auth_policy: RetryPolicy,
    pub submission_policy: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            batch_size: 20,
            poll_interval: Duration::from_secs(2),
            watchdog_timeout: Duration::from_secs(600),
            auth_policy: RetryPolicy::authentication(),
            submission_policy: RetryPolicy::submission(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_watchdog_timeout(mut self, timeout: Duration) -> Self {
        self.watchdog_timeout = timeout;
        self
    }

    pub fn with_auth_policy(mut self, policy: RetryPolicy) -> Self {
        self.auth_policy = policy;
        self
    }

    pub fn with_submission_policy(mut self, policy: RetryPolicy) -> Self {
        self.submission_policy = policy;
        self
    }
}

/// Locations of every file the scheduler reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub queue: PathBuf,
    /// Monitoring copy of the last withdrawn batch
    pub queue_mirror: PathBuf,
    pub snapshot: PathBuf,
    pub completed: PathBuf,
    pub submission_failed: PathBuf,
    pub run_failed: PathBuf,
}

impl DataPaths {
    /// Default layout under `data_dir`, completed log dated today (UTC).
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self::for_date(data_dir, Utc::now().date_naive())
    }

    pub fn for_date(data_dir: impl AsRef<Path>, date: NaiveDate) -> Self {
        let dir = data_dir.as_ref();
        let progress = dir.join("progress");
        Self {
            queue: dir.join("pending").join("pending_simulations.csv"),
            queue_mirror: progress.join("sim_queue.csv"),
            snapshot: progress.join("progress_state.json"),
            completed: dir
                .join("simulated")
                .join(format!("simulated_{}.csv", date.format("%Y-%m-%d"))),
            submission_failed: progress.join("fail_submissions.csv"),
            run_failed: progress.join("fail_simulations.csv"),
        }
    }

    /// Layout under `SIMFLOW_DATA_DIR` (default `.`), with the queue
    /// optionally moved by `SIMFLOW_QUEUE_FILE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let paths = Self::new(get("SIMFLOW_DATA_DIR").unwrap_or_else(|| ".".to_string()));
        match get("SIMFLOW_QUEUE_FILE") {
            Some(queue) => paths.with_queue(queue),
            None => paths,
        }
    }

    pub fn with_queue(mut self, path: impl Into<PathBuf>) -> Self {
        self.queue = path.into();
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CredentialsFile {
    Pair(String, String),
    Named { username: String, password: String },
}

/// Login for the remote service. `Debug` never prints the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read a JSON file holding `["username", "password"]` or
    /// `{"username": .., "password": ..}`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let err = |message: String| ConfigError::Credentials {
            path: path.to_path_buf(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| err(e.to_string()))?;
        let parsed: CredentialsFile =
            serde_json::from_str(&text).map_err(|e| err(e.to_string()))?;
        Ok(match parsed {
            CredentialsFile::Pair(username, password)
            | CredentialsFile::Named { username, password } => Self::new(username, password),
        })
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Remote service endpoint and login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub base_url: String,
    pub credentials: Credentials,
    pub request_timeout: Duration,
}

impl RemoteConfig {
    pub fn new(base_url: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            base_url: base_url.into(),
            credentials,
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Complete runtime configuration for the runner.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub paths: DataPaths,
    pub remote: RemoteConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let defaults = SchedulerConfig::default();
        let scheduler = SchedulerConfig::default()
            .with_max_concurrent(parse_or(&get, "SIMFLOW_MAX_CONCURRENT", defaults.max_concurrent)?)
            .with_batch_size(parse_or(&get, "SIMFLOW_BATCH_SIZE", defaults.batch_size)?)
            .with_poll_interval(Duration::from_secs(parse_or(
                &get,
                "SIMFLOW_POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )?))
            .with_watchdog_timeout(Duration::from_secs(parse_or(
                &get,
                "SIMFLOW_WATCHDOG_SECS",
                defaults.watchdog_timeout.as_secs(),
            )?));

        let paths = DataPaths::from_lookup(&get);

        let credentials = match (get("SIMFLOW_USERNAME"), get("SIMFLOW_PASSWORD")) {
            (Some(username), Some(password)) => Credentials::new(username, password),
            (Some(_), None) => return Err(ConfigError::Missing("SIMFLOW_PASSWORD".into())),
            (None, Some(_)) => return Err(ConfigError::Missing("SIMFLOW_USERNAME".into())),
            (None, None) => {
                let file = get("SIMFLOW_CREDENTIALS_FILE")
                    .unwrap_or_else(|| DEFAULT_CREDENTIALS_FILE.to_string());
                Credentials::from_file(file)?
            }
        };

        let base_url = get("SIMFLOW_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let remote = RemoteConfig::new(base_url, credentials).with_request_timeout(
            Duration::from_secs(parse_or(&get, "SIMFLOW_REQUEST_TIMEOUT_SECS", 30)?),
        );

        Ok(Self {
            scheduler,
            paths,
            remote,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}
