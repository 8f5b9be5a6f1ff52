use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{PersistedState, StateStore};
use crate::error::EngineError;
use crate::Result;

/// JSON file on local disk, replaced atomically on every save
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> EngineError {
    EngineError::Persistence(format!("{action} {}: {e}", path.display()))
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn save(&self, state: &PersistedState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| EngineError::Persistence(e.to_string()))?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| io_error("create", dir, e))?;
        }

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| io_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_error("rename", &self.path, e))?;

        tracing::debug!(path = %self.path.display(), bytes = json.len(), "Saved state");
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistedState>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error("read", &self.path, e)),
        };

        let state = serde_json::from_slice(&bytes).map_err(|e| {
            EngineError::Persistence(format!("corrupt state file {}: {e}", self.path.display()))
        })?;
        Ok(Some(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{LedgerSettings, PositionLedger};
    use crate::models::{Direction, LevelRef};
    use crate::risk::{DailyRiskState, RiskLimits};
    use crate::session::{Session, SessionParams, StopReason};
    use crate::strategy::{LevelParams, StrategyParams};
    use chrono::Utc;

    fn sample_state() -> PersistedState {
        let params = SessionParams {
            symbol: "ETHUSDT".to_string(),
            strategy: StrategyParams::StaticLevels(LevelParams::four(
                4000.0, 3950.0, 3900.0, 3850.0, 15.0,
            )),
            risk: RiskLimits::default(),
            ledger: LedgerSettings::default(),
        };
        let mut ledger = PositionLedger::new(LedgerSettings::default()).unwrap();

        let mut ended = Session::new(params.clone(), Utc::now());
        let id = ledger
            .open(ended.id, Direction::Short, 3955.0, 15.0, LevelRef::WeakResistance, Utc::now(), None)
            .id;
        ended.attach(id);
        ledger.settle(id, 3960.0, Utc::now()).unwrap();
        ended.end(StopReason::Reconfigured, Utc::now());

        let mut active = Session::new(params, Utc::now());
        let id = ledger
            .open(
                active.id,
                Direction::Long,
                3899.0,
                15.0,
                LevelRef::WeakSupport,
                Utc::now(),
                Some("paper-7".to_string()),
            )
            .id;
        active.attach(id);

        PersistedState {
            risk: DailyRiskState {
                trading_day_id: "2024-05-02".to_string(),
                cumulative_pnl: -15.0,
                is_halted: false,
            },
            sessions: vec![ended.to_record(&ledger), active.to_record(&ledger)],
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("state.json"));
        let state = sample_state();

        store.save(&state).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.active_session().unwrap().open_positions(), 1);

        // Overwrite keeps only the latest snapshot
        let mut next = state.clone();
        next.risk.is_halted = true;
        store.save(&next).await.unwrap();
        assert!(store.load().await.unwrap().unwrap().risk.is_halted);
        assert!(!store.tmp_path().exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let store = JsonFileStore::new(path);
        assert!(matches!(store.load().await, Err(EngineError::Persistence(_))));
    }
}
