//! Redis-backed [`KeyValueStore`] shared by every server instance.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use redis::{
    AsyncCommands, Client, ErrorKind, RedisError, RedisResult, Script, aio::ConnectionManager,
};
use tracing::{debug, info};

use super::store::{KeyValueStore, SCAN_BATCH, StoreError};

/// Increment a counter and attach its expiry in the same server-side step.
///
/// A counter found without an expiry (PTTL -1) gets one too, so keys left
/// behind by a non-atomic writer cannot pin a client at the ceiling forever.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('PTTL', KEYS[1]) == -1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

pub struct RedisStore {
    connection: ConnectionManager,
    increment: Script,
    op_timeout: Duration,
}

impl RedisStore {
    /// Open a managed connection, failing if the server is unreachable within
    /// `connect_timeout`.
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        op_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(map_redis_error)?;
        let connection = tokio::time::timeout(connect_timeout, client.get_connection_manager())
            .await
            .map_err(|_| {
                StoreError::Transport(format!(
                    "connecting to store timed out after {}ms",
                    connect_timeout.as_millis()
                ))
            })?
            .map_err(map_redis_error)?;

        info!(op_timeout_ms = op_timeout.as_millis() as u64, "key-value store connected");

        Ok(Self {
            connection,
            increment: Script::new(INCREMENT_SCRIPT),
            op_timeout,
        })
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>> + Send,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(map_redis_error),
            Err(_) => Err(StoreError::Transport(format!(
                "{op} timed out after {}ms",
                self.op_timeout.as_millis()
            ))),
        }
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = self.bounded("GET", conn.get(key)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(ttl_millis(ttl));
        let _: () = self.bounded("SET", cmd.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: u64 = self.bounded("DEL", conn.del(key)).await?;
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let (next, keys): (u64, Vec<String>) =
                self.bounded("SCAN", scan.query_async(&mut conn)).await?;

            if !keys.is_empty() {
                let mut del = redis::cmd("DEL");
                del.arg(&keys);
                let removed: u64 = self.bounded("DEL", del.query_async(&mut conn)).await?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern, deleted, "pattern delete finished");
        Ok(deleted)
    }

    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();
        let mut invocation = self.increment.key(key);
        invocation.arg(ttl_millis(ttl));
        let count: u64 = self
            .bounded("INCR", invocation.invoke_async(&mut conn))
            .await?;
        Ok(count)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let reply: String = self
            .bounded("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        if reply.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(StoreError::Protocol(format!("unexpected PING reply `{reply}`")))
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn map_redis_error(err: RedisError) -> StoreError {
    match err.kind() {
        ErrorKind::TypeError | ErrorKind::ResponseError => StoreError::Protocol(err.to_string()),
        _ => StoreError::transport(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(60)), 60_000);
    }

    #[test]
    fn type_errors_are_protocol_errors() {
        let err = RedisError::from((ErrorKind::TypeError, "not an integer"));
        assert!(matches!(map_redis_error(err), StoreError::Protocol(_)));

        let err = RedisError::from((ErrorKind::IoError, "connection reset"));
        assert!(matches!(map_redis_error(err), StoreError::Transport(_)));
    }
}
