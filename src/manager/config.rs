//! Manager configuration.
//!
//! [`ManagerConfig`] can be built in code, parsed from TOML, or read from
//! the environment:
//!
//! ```toml
//! workers = 8
//! default_max_retries = 5
//! execution_timeout_ms = 30000
//! ```
//!
//! | Variable                  | Field                 |
//! |---------------------------|-----------------------|
//! | `TASK_ENGINE_WORKERS`     | `workers`             |
//! | `TASK_ENGINE_MAX_RETRIES` | `default_max_retries` |
//! | `TASK_ENGINE_TIMEOUT_MS`  | `execution_timeout`   |

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::constants::{
    DEFAULT_MAX_RETRIES, DEFAULT_WORKERS, ENV_MAX_RETRIES, ENV_TIMEOUT_MS, ENV_WORKERS,
};
use crate::error::TaskError;

/// Worker pool and submission defaults.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use task_engine::ManagerConfig;
///
/// let config = ManagerConfig::default()
///     .with_workers(2)
///     .with_execution_timeout(Duration::from_secs(30));
/// assert_eq!(config.workers, 2);
/// assert_eq!(config.default_max_retries, 3);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Number of tasks allowed to execute at once.
    pub workers: usize,

    /// `max_retries` recorded on a task when `submit` is not given one.
    pub default_max_retries: u32,

    /// Upper bound on a single handler execution. `None` means no limit.
    #[serde(
        rename = "execution_timeout_ms",
        deserialize_with = "deserialize_timeout_ms"
    )]
    pub execution_timeout: Option<Duration>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            default_max_retries: DEFAULT_MAX_RETRIES,
            execution_timeout: None,
        }
    }
}

fn deserialize_timeout_ms<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
}

impl ManagerConfig {
    /// Sets the pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the default retry budget for new tasks.
    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Sets the per-execution timeout.
    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// Parses and validates a TOML document. Missing keys keep their
    /// defaults.
    ///
    /// ```
    /// use std::time::Duration;
    /// use task_engine::ManagerConfig;
    ///
    /// let config = ManagerConfig::from_toml_str("workers = 2\nexecution_timeout_ms = 1500").unwrap();
    /// assert_eq!(config.workers, 2);
    /// assert_eq!(config.execution_timeout, Some(Duration::from_millis(1500)));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Config`] on malformed TOML, unknown keys, or a
    /// configuration that fails [`validate`](Self::validate).
    pub fn from_toml_str(input: &str) -> Result<Self, TaskError> {
        let config: Self =
            toml::from_str(input).map_err(|e| TaskError::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads overrides from the `TASK_ENGINE_*` environment variables on top
    /// of the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Config`] if a variable is set but unparsable, or
    /// the result fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, TaskError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading variables through
    /// `lookup` instead of the process environment.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, TaskError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(workers) = parse_var(&lookup, ENV_WORKERS)? {
            config.workers = workers;
        }
        if let Some(max_retries) = parse_var(&lookup, ENV_MAX_RETRIES)? {
            config.default_max_retries = max_retries;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_TIMEOUT_MS)? {
            config.execution_timeout = Some(Duration::from_millis(ms));
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Config`] if `workers` is zero.
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.workers == 0 {
            return Err(TaskError::Config(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, TaskError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| TaskError::Config(format!("{name}={raw:?}: {e}"))),
    }
}
