//! Key-value store contract shared by the response cache, the statistics
//! cache and the rate limiter.
//!
//! Every server instance talks to the same store; implementations must be
//! safe to share across tasks and are never re-synchronized locally.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Keys examined per cursor step when deleting by pattern.
pub const SCAN_BATCH: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store transport error: {0}")]
    Transport(String),
    #[error("store returned an unexpected reply: {0}")]
    Protocol(String),
    #[error("failed to encode cache value: {0}")]
    Encode(String),
    #[error("failed to decode cache value: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Delete every key matching a glob `pattern`, walking the key space with
    /// a cursor in batches of [`SCAN_BATCH`]. Returns the number of keys removed.
    async fn delete_by_pattern(&self, pattern: &str) -> Result<u64, StoreError>;

    /// Increment the counter at `key` and return the new value.
    ///
    /// The expiry is attached in the same atomic step when the counter is
    /// created (the returned value is 1); later increments never extend it.
    async fn increment_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// JSON convenience layer over any [`KeyValueStore`].
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|err| StoreError::Decode(err.to_string())),
            None => Ok(None),
        }
    }

    async fn set_json<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), StoreError>
    where
        T: Serialize + Sync,
    {
        let encoded =
            serde_json::to_vec(value).map_err(|err| StoreError::Encode(err.to_string()))?;
        self.set(key, &encoded, ttl).await
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStoreExt for S {}
