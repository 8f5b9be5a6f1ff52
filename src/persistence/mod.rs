// Durable engine state: daily risk and session history
pub mod json_file;
pub mod redis_store;

pub use json_file::JsonFileStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::error::EngineError;
use crate::risk::DailyRiskState;
use crate::session::SessionRecord;
use crate::Result;

/// Everything needed to resume after a restart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub risk: DailyRiskState,
    pub sessions: Vec<SessionRecord>,
}

impl PersistedState {
    /// The session that was running when the state was saved
    pub fn active_session(&self) -> Option<&SessionRecord> {
        self.sessions.iter().rev().find(|s| s.is_active)
    }
}

/// Sole writer of durable state
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save(&self, state: &PersistedState) -> Result<()>;

    /// Ok(None) when nothing has been saved yet
    async fn load(&self) -> Result<Option<PersistedState>>;
}

/// Non-durable store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<PersistedState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn save(&self, state: &PersistedState) -> Result<()> {
        *self.state.lock().await = Some(state.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistedState>> {
        Ok(self.state.lock().await.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum PersistenceSettings {
    File { path: PathBuf },
    Redis { url: String, key: String },
    Memory,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        PersistenceSettings::File {
            path: PathBuf::from("data/eventbot_state.json"),
        }
    }
}

impl PersistenceSettings {
    pub fn validate(&self) -> Result<()> {
        match self {
            PersistenceSettings::File { path } if path.as_os_str().is_empty() => {
                Err(EngineError::config("persistence path must not be empty"))
            }
            PersistenceSettings::Redis { url, key } if url.is_empty() || key.is_empty() => {
                Err(EngineError::config("redis url and key must not be empty"))
            }
            _ => Ok(()),
        }
    }

    /// Open the configured backend
    pub async fn open(&self) -> Result<Box<dyn StateStore>> {
        Ok(match self {
            PersistenceSettings::File { path } => Box::new(JsonFileStore::new(path.clone())),
            PersistenceSettings::Redis { url, key } => Box::new(RedisStore::new(url, key).await?),
            PersistenceSettings::Memory => Box::new(MemoryStore::new()),
        })
    }
}
