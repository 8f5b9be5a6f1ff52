use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::engine::EngineSettings;
use crate::error::EngineError;
use crate::execution::{FeedSettings, LedgerSettings};
use crate::persistence::PersistenceSettings;
use crate::risk::RiskLimits;
use crate::session::SessionParams;
use crate::strategy::StrategyParams;
use crate::Result;

pub const DEFAULT_CONFIG_PATH: &str = "config/eventbot.toml";
const ENV_PREFIX: &str = "EVENTBOT";

/// Full settings tree: defaults, then the TOML file, then `EVENTBOT__*` variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub symbol: String,
    pub feed: FeedSettings,
    pub risk: RiskLimits,
    pub ledger: LedgerSettings,
    /// No default; a session cannot start without one
    pub strategy: Option<StrategyParams>,
    pub persistence: PersistenceSettings,
    pub engine: EngineSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            symbol: "ETHUSDT".to_string(),
            feed: FeedSettings::default(),
            risk: RiskLimits::default(),
            ledger: LedgerSettings::default(),
            strategy: None,
            persistence: PersistenceSettings::default(),
            engine: EngineSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings
    ///
    /// An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        Self::load_from(&path, required, ENV_PREFIX)
    }

    fn load_from(path: &Path, required: bool, env_prefix: &str) -> Result<Self> {
        if !path.exists() && !required {
            tracing::debug!(path = %path.display(), "No config file, using defaults and environment");
        }

        let settings: Settings = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(required))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| EngineError::config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(EngineError::config("symbol must not be empty"));
        }
        self.feed.validate()?;
        self.risk.validate()?;
        self.ledger.validate()?;
        if let Some(strategy) = &self.strategy {
            strategy.validate()?;
        }
        self.persistence.validate()?;
        self.engine.validate()
    }

    /// Parameters for the session these settings describe
    pub fn session_params(&self) -> Result<SessionParams> {
        let strategy = self
            .strategy
            .clone()
            .ok_or_else(|| EngineError::config("no [strategy] configured"))?;
        let params = SessionParams {
            symbol: self.symbol.to_uppercase(),
            strategy,
            risk: self.risk.clone(),
            ledger: self.ledger.clone(),
        };
        params.validate()?;
        Ok(params)
    }
}
