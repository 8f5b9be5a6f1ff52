// Core modules
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod notify;
pub mod persistence;
pub mod risk;
pub mod session;
pub mod strategy;

// Re-export commonly used types
pub use engine::{Engine, StepOutput};
pub use error::EngineError;
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, EngineError>;
