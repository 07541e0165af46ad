//! Default limits and well-known messages shared across the engine.

/// Default retry budget recorded on a task when the caller does not pass one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default number of concurrently executing tasks.
pub const DEFAULT_WORKERS: usize = 5;

/// Default base delay for [`RetryPolicy`](crate::retry::RetryPolicy), in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Default upper bound on a serialized task payload (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1_048_576;

/// How many times a store mutation re-reads and retries after a CAS conflict.
pub const DEFAULT_MAX_UPDATE_ATTEMPTS: u32 = 8;

/// Error message written to a task that was cancelled before a worker picked it up.
///
/// ```
/// use task_engine::constants::CANCELLED_MESSAGE;
///
/// assert_eq!(CANCELLED_MESSAGE, "cancelled");
/// ```
pub const CANCELLED_MESSAGE: &str = "cancelled";

/// Environment variable overriding [`DEFAULT_WORKERS`].
pub const ENV_WORKERS: &str = "TASK_ENGINE_WORKERS";

/// Environment variable overriding [`DEFAULT_MAX_RETRIES`].
pub const ENV_MAX_RETRIES: &str = "TASK_ENGINE_MAX_RETRIES";

/// Environment variable setting the execution timeout in milliseconds.
pub const ENV_TIMEOUT_MS: &str = "TASK_ENGINE_TIMEOUT_MS";
