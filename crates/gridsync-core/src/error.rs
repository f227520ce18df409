//! Error types for gridsync core.

use std::path::PathBuf;

use thiserror::Error;

use gridsync_engine::EngineError;

/// Failure reported by the persistence collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("invalid seed data at line {line}: {message}")]
    Seed { line: usize, message: String },
}

/// Errors that can occur in gridsync core
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Config error in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// The engine error, when this failure is a formula-level one.
    pub fn as_engine(&self) -> Option<&EngineError> {
        match self {
            CoreError::Engine(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
