//! Redis-backed [`SharedStore`].
//!
//! Running sets are sorted sets scored by registration time in milliseconds.
//! Compare-and-delete and compare-and-expire run as Lua scripts so the read
//! and the write happen atomically on the server.

use super::{SetMember, SharedStore};
use crate::clock::SharedClock;
use crate::config::RedisConfig;
use crate::error::{JobgateError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::Duration;
use tracing::info;

const DELETE_IF_EQ: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const EXPIRE_IF_EQ: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Shared store on a Redis server.
pub struct RedisStore {
    conn: ConnectionManager,
    key_prefix: String,
    clock: SharedClock,
    delete_if_eq: Script,
    expire_if_eq: Script,
}

impl RedisStore {
    /// Connect and verify the server answers `PING`.
    pub async fn new(config: &RedisConfig, clock: SharedClock) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| JobgateError::configuration(format!("invalid redis url: {}", e)))?;

        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| JobgateError::store_unavailable("redis", e.to_string()))?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        info!(url = %config.url, key_prefix = %config.key_prefix, "Redis store connected");

        Ok(Self {
            conn,
            key_prefix: config.key_prefix.clone(),
            clock,
            delete_if_eq: Script::new(DELETE_IF_EQ),
            expire_if_eq: Script::new(EXPIRE_IF_EQ),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    fn full_key(&self, key: &str) -> String {
        prefixed(&self.key_prefix, key)
    }
}

fn prefixed(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

/// Redis rejects a zero expiry.
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

fn from_score(score: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(score as i64).unwrap_or_default()
}

#[async_trait]
impl SharedStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<bool> {
        let key = self.full_key(key);
        let score = self.clock.now().timestamp_millis();

        let (added,): (i64,) = redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&key)
            .arg("NX")
            .arg(score)
            .arg(member)
            .cmd("PEXPIRE")
            .arg(&key)
            .arg(ttl_millis(ttl))
            .ignore()
            .query_async(&mut self.conn())
            .await?;

        Ok(added > 0)
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> Result<u64> {
        if members.is_empty() {
            return Ok(0);
        }

        let removed: u64 = redis::cmd("ZREM")
            .arg(self.full_key(key))
            .arg(members)
            .query_async(&mut self.conn())
            .await?;

        Ok(removed)
    }

    async fn set_count(&self, key: &str) -> Result<u64> {
        let count: u64 = redis::cmd("ZCARD")
            .arg(self.full_key(key))
            .query_async(&mut self.conn())
            .await?;

        Ok(count)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<SetMember>> {
        let raw: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(self.full_key(key))
            .arg(0)
            .arg(-1)
            .arg("WITHSCORES")
            .query_async(&mut self.conn())
            .await?;

        Ok(raw
            .into_iter()
            .map(|(member, score)| SetMember {
                member,
                added_at: from_score(score),
            })
            .collect())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.full_key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut self.conn())
            .await?;

        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = redis::cmd("GET")
            .arg(self.full_key(key))
            .query_async(&mut self.conn())
            .await?;

        Ok(value)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        // -2: no such key, -1: no expiry
        let millis: i64 = redis::cmd("PTTL")
            .arg(self.full_key(key))
            .query_async(&mut self.conn())
            .await?;

        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let deleted: i64 = redis::cmd("DEL")
            .arg(self.full_key(key))
            .query_async(&mut self.conn())
            .await?;

        Ok(deleted > 0)
    }

    async fn delete_if_eq(&self, key: &str, expected: &str) -> Result<bool> {
        let deleted: i64 = self
            .delete_if_eq
            .key(self.full_key(key))
            .arg(expected)
            .invoke_async(&mut self.conn())
            .await?;

        Ok(deleted > 0)
    }

    async fn expire_if_eq(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        let updated: i64 = self
            .expire_if_eq
            .key(self.full_key(key))
            .arg(expected)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut self.conn())
            .await?;

        Ok(updated > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_keys() {
        assert_eq!(prefixed("jobgate:", "export:running"), "jobgate:export:running");
        assert_eq!(prefixed("", "lease"), "lease");
    }

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn test_from_score() {
        let now = Utc::now();
        let restored = from_score(now.timestamp_millis() as f64);
        assert_eq!(restored.timestamp_millis(), now.timestamp_millis());
    }

    #[tokio::test]
    async fn test_invalid_url_is_configuration_error() {
        let config = RedisConfig {
            url: "not a url".to_string(),
            key_prefix: "jobgate:".to_string(),
        };
        let clock: SharedClock = std::sync::Arc::new(crate::clock::SystemClock);

        let error = match RedisStore::new(&config, clock).await {
            Ok(_) => panic!("expected an error"),
            Err(error) => error,
        };
        assert_eq!(error.code(), crate::error::ErrorCode::ConfigurationError);
    }
}
