//! Key-value cache adapter.
//!
//! Thin, bounded wrapper over a Redis connection manager exposing exactly
//! the capabilities the permission cache needs: TTL get/set, multi-key
//! delete, cursor-based SCAN, pipelined batch operations and server-side
//! atomic scripts. Pattern deletion walks the key space with SCAN (never
//! KEYS) and deletes matches in bounded batches so memory stays flat no
//! matter how many keys a principal has accumulated.
//!
//! The adapter tolerates missing items (`get` returns `None`) and is
//! designed to run behind the cache circuit breaker; every error it returns
//! is a [`crate::error::Error`] with a cache-category code.

use crate::error::{Error, ErrorCode, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

/// Batch size for scan-based deletion.
const SCAN_DELETE_BATCH: usize = 1000;

/// Number of keys requested per SCAN round trip.
const SCAN_COUNT: usize = 100;

/// One pipelined SET operation.
#[derive(Debug, Clone)]
pub struct PipelineSet {
    pub key: String,
    pub value: String,
    pub ttl_secs: u64,
}

/// Redis-backed key-value adapter.
#[derive(Clone)]
pub struct RedisCacheAdapter {
    conn: ConnectionManager,
}

impl RedisCacheAdapter {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Connect from a Redis URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::new(ErrorCode::ConfigurationError, e.to_string()))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    /// Delete the given keys; missing keys are not an error.
    pub async fn del(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let deleted: u64 = conn.del(keys).await?;
        Ok(deleted)
    }

    /// Remaining TTL of a key in seconds; `None` if the key does not exist
    /// or carries no expiry.
    pub async fn ttl(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn.ttl(key).await?;
        // Redis returns -2 for missing keys and -1 for keys without expiry
        Ok(if ttl < 0 { None } else { Some(ttl) })
    }

    /// One SCAN step. Returns the next cursor (0 when the scan completed)
    /// and the keys found in this round trip.
    pub async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        let mut conn = self.conn.clone();
        let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok((next_cursor, keys))
    }

    /// Collect every key matching the pattern with a full cursor walk.
    pub async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut cursor = 0u64;
        let mut keys = Vec::new();

        loop {
            let (next_cursor, batch) = self.scan(cursor, pattern, SCAN_COUNT).await?;
            keys.extend(batch);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(keys)
    }

    /// Delete all keys matching a pattern, in batches of 1000.
    pub async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        let mut cursor = 0u64;
        let mut pending: Vec<String> = Vec::new();
        let mut deleted = 0u64;

        loop {
            let (next_cursor, batch) = self.scan(cursor, pattern, SCAN_COUNT).await?;
            pending.extend(batch);

            if pending.len() >= SCAN_DELETE_BATCH {
                let chunk: Vec<String> = pending.drain(..SCAN_DELETE_BATCH).collect();
                deleted += self.del(&chunk).await?;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        if !pending.is_empty() {
            deleted += self.del(&pending).await?;
        }

        debug!(pattern = %pattern, deleted = deleted, "Pattern delete completed");
        Ok(deleted)
    }

    /// Pipelined multi-get. The result vector is positionally aligned with
    /// the requested keys; misses come back as `None`.
    pub async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.get(key);
        }
        let values: Vec<Option<String>> = pipe.query_async(&mut conn).await?;
        Ok(values)
    }

    /// Pipelined SET with per-key TTL, dispatched atomically.
    pub async fn pipeline_set(&self, ops: &[PipelineSet]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            pipe.set_ex(&op.key, &op.value, op.ttl_secs).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    /// Run a server-side script for atomic read-modify-write sequences.
    pub async fn eval(&self, script: &str, keys: &[String], args: &[String]) -> Result<i64> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("EVAL");
        cmd.arg(script).arg(keys.len());
        for key in keys {
            cmd.arg(key);
        }
        for arg in args {
            cmd.arg(arg);
        }
        let result: i64 = cmd.query_async(&mut conn).await?;
        Ok(result)
    }

    /// Atomically increment a counter, attaching an expiry when the counter
    /// transitions from absent to 1. Returns the post-increment value.
    pub async fn incr_with_window(&self, key: &str, window_secs: u64) -> Result<i64> {
        const SCRIPT: &str = r#"
            local current = redis.call('INCR', KEYS[1])
            if current == 1 then
                redis.call('EXPIRE', KEYS[1], ARGV[1])
            end
            return current
        "#;
        self.eval(SCRIPT, &[key.to_string()], &[window_secs.to_string()])
            .await
    }

    pub async fn check_health(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
