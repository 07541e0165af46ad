//! Redis storage backend for durable task persistence.
//!
//! [`RedisBackend`] implements [`StorageBackend`] on top of Redis. Reads use
//! `HGETALL`; writes run as Lua scripts (`redis::Script`) so that the version
//! check, the hash update, and the index update happen in one round-trip.
//!
//! # Key Schema
//!
//! | Key | Redis type | Holds |
//! |-----|------------|-------|
//! | `{prefix}:{storage_key}` | Hash | Task record (`version`, `data`) |
//! | `{prefix}:idx` | Sorted Set | All task keys scored by creation time (ms) |
//!
//! # Connections
//!
//! The backend holds a [`ConnectionManager`], which is a cheap-to-clone
//! handle that multiplexes commands and reconnects on failure. Every
//! operation clones it, so concurrent workers never share a mutable
//! connection object.
//!
//! # Usage
//!
//! ```rust,no_run
//! use task_engine::store::generic::GenericTaskStore;
//! use task_engine::store::redis::RedisBackend;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = RedisBackend::new("redis://127.0.0.1:6379").await?;
//! let store = GenericTaskStore::new(backend);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Script};
use async_trait::async_trait;

use crate::store::backend::{StorageBackend, StorageError, VersionedRecord};

// KEYS[1] = record hash, KEYS[2] = creation index
// ARGV[1] = data, ARGV[2] = storage key, ARGV[3] = created_at (ms)
const LUA_PUT: &str = r#"
local version = redis.call('HINCRBY', KEYS[1], 'version', 1)
redis.call('HSET', KEYS[1], 'data', ARGV[1])
redis.call('ZADD', KEYS[2], 'NX', ARGV[3], ARGV[2])
return version
"#;

// KEYS[1] = record hash
// ARGV[1] = data, ARGV[2] = expected version
// returns {1, new} on success, {0, stored} on conflict, {-1, 0} if missing
const LUA_PUT_IF_VERSION: &str = r#"
local stored = redis.call('HGET', KEYS[1], 'version')
if stored == false then
    return {-1, 0}
end
stored = tonumber(stored)
if stored ~= tonumber(ARGV[2]) then
    return {0, stored}
end
redis.call('HSET', KEYS[1], 'data', ARGV[1])
return {1, redis.call('HINCRBY', KEYS[1], 'version', 1)}
"#;

// KEYS[1] = record hash, KEYS[2] = creation index, ARGV[1] = storage key
const LUA_DELETE: &str = r#"
if redis.call('DEL', KEYS[1]) == 0 then
    return 0
end
redis.call('ZREM', KEYS[2], ARGV[1])
return 1
"#;

const DEFAULT_KEY_PREFIX: &str = "task-engine";

/// Durable [`StorageBackend`] backed by Redis.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    key_prefix: String,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Connects to Redis at `url` with the default key prefix.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if the URL is invalid or the
    /// initial connection fails.
    pub async fn new(url: &str) -> Result<Self, StorageError> {
        let client = ::redis::Client::open(url)
            .map_err(|e| StorageError::backend(format!("failed to create Redis client: {e}"), e))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| StorageError::backend(format!("failed to connect to Redis: {e}"), e))?;
        Ok(Self::with_connection(conn))
    }

    /// Creates a backend over a caller-managed connection manager.
    pub fn with_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Sets a custom key prefix, e.g. for test isolation.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    fn hash_key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    fn index_key(&self) -> String {
        format!("{}:idx", self.key_prefix)
    }
}

/// Pulls `created_at` out of a serialized record for index scoring.
fn extract_created_at_ms(data: &[u8]) -> Option<i64> {
    let value: serde_json::Value = serde_json::from_slice(data).ok()?;
    let created_at = value.get("created_at")?.as_str()?;
    let dt = chrono::DateTime::parse_from_rfc3339(created_at).ok()?;
    Some(dt.timestamp_millis())
}

fn map_redis_error(err: ::redis::RedisError, key: &str) -> StorageError {
    StorageError::backend(format!("Redis error for key {key}: {err}"), err)
}

fn utf8(data: &[u8]) -> Result<&str, StorageError> {
    std::str::from_utf8(data)
        .map_err(|e| StorageError::backend(format!("data is not valid UTF-8: {e}"), e))
}

fn versioned_from_fields(
    key: &str,
    fields: &HashMap<String, String>,
) -> Result<VersionedRecord, StorageError> {
    let version: u64 = fields
        .get("version")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| StorageError::Backend {
            message: format!("missing or invalid version field for key {key}"),
            source: None,
        })?;
    let data = fields.get("data").ok_or_else(|| StorageError::Backend {
        message: format!("missing data field for key {key}"),
        source: None,
    })?;
    Ok(VersionedRecord {
        data: data.as_bytes().to_vec(),
        version,
    })
}

#[async_trait]
impl StorageBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<VersionedRecord, StorageError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(self.hash_key(key))
            .await
            .map_err(|e| map_redis_error(e, key))?;

        if fields.is_empty() {
            return Err(StorageError::NotFound {
                key: key.to_string(),
            });
        }
        versioned_from_fields(key, &fields)
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<u64, StorageError> {
        let data_str = utf8(data)?;
        let created_ms = extract_created_at_ms(data).unwrap_or(0);

        let new_version: u64 = Script::new(LUA_PUT)
            .key(self.hash_key(key))
            .key(self.index_key())
            .arg(data_str)
            .arg(key)
            .arg(created_ms)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, key))?;

        Ok(new_version)
    }

    async fn put_if_version(
        &self,
        key: &str,
        data: &[u8],
        expected_version: u64,
    ) -> Result<u64, StorageError> {
        let data_str = utf8(data)?;

        let (outcome, version): (i64, i64) = Script::new(LUA_PUT_IF_VERSION)
            .key(self.hash_key(key))
            .arg(data_str)
            .arg(expected_version)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, key))?;

        match outcome {
            1 => Ok(version as u64),
            0 => Err(StorageError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual: version as u64,
            }),
            _ => Err(StorageError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let removed: i64 = Script::new(LUA_DELETE)
            .key(self.hash_key(key))
            .key(self.index_key())
            .arg(key)
            .invoke_async(&mut self.conn.clone())
            .await
            .map_err(|e| map_redis_error(e, key))?;

        Ok(removed == 1)
    }

    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, VersionedRecord)>, StorageError> {
        let mut conn = self.conn.clone();
        let keys: Vec<String> = conn
            .zrange(self.index_key(), 0, -1)
            .await
            .map_err(|e| map_redis_error(e, prefix))?;

        let mut results = Vec::new();
        let mut orphaned: Vec<String> = Vec::new();

        for key in keys.into_iter().filter(|k| k.starts_with(prefix)) {
            let fields: HashMap<String, String> = conn
                .hgetall(self.hash_key(&key))
                .await
                .map_err(|e| map_redis_error(e, &key))?;

            if fields.is_empty() {
                orphaned.push(key);
                continue;
            }
            let record = versioned_from_fields(&key, &fields)?;
            results.push((key, record));
        }

        if !orphaned.is_empty() {
            // best-effort index repair
            let _: Result<(), ::redis::RedisError> =
                conn.zrem(self.index_key(), &orphaned).await;
        }

        Ok(results)
    }
}

/// Contract tests for [`RedisBackend`] against a real Redis instance.
///
/// Requires a running Redis (`REDIS_URL`, default `redis://127.0.0.1:6379`):
///
/// ```bash
/// cargo test --features redis-tests -- redis_ --test-threads=1
/// ```
///
/// Each test uses a UUID key prefix, so runs do not interfere.
#[cfg(all(test, feature = "redis-tests"))]
mod integration_tests {
    use super::*;
    use crate::store::backend::make_key;
    use crate::store::generic::GenericTaskStore;
    use crate::types::task::TaskStatus;
    use serde_json::json;

    async fn test_backend() -> RedisBackend {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        RedisBackend::new(&url)
            .await
            .expect("Redis connection failed -- is Redis running?")
            .with_prefix(format!("test-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn redis_get_missing_key_returns_not_found() {
        let backend = test_backend().await;
        let result = backend.get(&make_key("nonexistent")).await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn redis_put_then_cas() {
        let backend = test_backend().await;
        let key = make_key("t1");
        let v1 = backend.put(&key, br#"{"a":1}"#).await.unwrap();
        assert_eq!(v1, 1);

        let v2 = backend.put_if_version(&key, br#"{"a":2}"#, v1).await.unwrap();
        assert_eq!(v2, 2);

        let stale = backend.put_if_version(&key, br#"{"a":3}"#, v1).await;
        assert!(matches!(
            stale,
            Err(StorageError::VersionConflict { actual: 2, .. })
        ));
        assert!(backend.delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn redis_store_lifecycle() {
        let store = GenericTaskStore::new(test_backend().await);
        let record = store.create("nft_mint", json!({"u": 1}), 3).await.unwrap();
        store
            .update_status(&record.id, TaskStatus::Running, None, None)
            .await
            .unwrap();
        let done = store
            .update_status(&record.id, TaskStatus::Completed, Some(json!({"x": 1})), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.result, Some(json!({"x": 1})));

        let completed = store.list_by_status(TaskStatus::Completed).await.unwrap();
        assert_eq!(completed.len(), 1);
    }
}
