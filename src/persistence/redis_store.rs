use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

use super::{PersistedState, StateStore};
use crate::error::EngineError;
use crate::Result;

/// Redis persistence for engine state
///
/// The whole snapshot lives as one JSON string under `key`.
pub struct RedisStore {
    conn: ConnectionManager,
    key: String,
}

impl RedisStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `key` - Key holding the state snapshot
    pub async fn new(redis_url: &str, key: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| {
                EngineError::Persistence("Redis connection timeout after 5 seconds".to_string())
            })??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            key: key.to_string(),
        })
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn save(&self, state: &PersistedState) -> Result<()> {
        let value = serde_json::to_string(state)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        // ConnectionManager is a cheap handle onto one multiplexed connection
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&self.key, value).await?;

        tracing::debug!(key = %self.key, "Saved state to Redis");
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistedState>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(&self.key).await?;

        match value {
            Some(json) => {
                let state = serde_json::from_str(&json)
                    .map_err(|e| EngineError::Persistence(format!("corrupt state in Redis: {e}")))?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }
}
