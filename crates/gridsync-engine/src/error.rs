//! Error types for the gridsync formula engine.

use serde::Serialize;
use thiserror::Error;

use crate::engine::Coordinate;

/// Coarse classification of an [`EngineError`], stable across messages.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize)]
pub enum ErrorKind {
    ParseError,
    EvaluationError,
    CircularReference,
    RecalculationBudgetExceeded,
}

/// Errors produced while parsing, resolving or evaluating a formula.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Parse error: {message}")]
    Parse {
        message: String,
        cell: Option<Coordinate>,
    },

    #[error("Evaluation error: {message}")]
    Evaluation {
        message: String,
        cell: Option<Coordinate>,
    },

    #[error("Circular reference at {origin}: {}", format_path(.path))]
    CircularReference {
        origin: Coordinate,
        path: Vec<Coordinate>,
    },

    #[error("Recalculation budget exceeded: {message}")]
    BudgetExceeded {
        message: String,
        cell: Option<Coordinate>,
    },
}

impl EngineError {
    pub fn parse(message: impl Into<String>) -> Self {
        EngineError::Parse {
            message: message.into(),
            cell: None,
        }
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        EngineError::Evaluation {
            message: message.into(),
            cell: None,
        }
    }

    pub fn budget(message: impl Into<String>) -> Self {
        EngineError::BudgetExceeded {
            message: message.into(),
            cell: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Parse { .. } => ErrorKind::ParseError,
            EngineError::Evaluation { .. } => ErrorKind::EvaluationError,
            EngineError::CircularReference { .. } => ErrorKind::CircularReference,
            EngineError::BudgetExceeded { .. } => ErrorKind::RecalculationBudgetExceeded,
        }
    }

    /// The offending cell, when one is known.
    pub fn coordinate(&self) -> Option<Coordinate> {
        match self {
            EngineError::Parse { cell, .. }
            | EngineError::Evaluation { cell, .. }
            | EngineError::BudgetExceeded { cell, .. } => *cell,
            EngineError::CircularReference { origin, .. } => Some(*origin),
        }
    }

    /// Attach the offending cell if the error does not name one yet.
    /// An inner, more specific coordinate always wins.
    pub fn at(mut self, at: Coordinate) -> Self {
        match &mut self {
            EngineError::Parse { cell, .. }
            | EngineError::Evaluation { cell, .. }
            | EngineError::BudgetExceeded { cell, .. } => {
                cell.get_or_insert(at);
            }
            EngineError::CircularReference { .. } => {}
        }
        self
    }

    /// Short marker shown in place of a value, spreadsheet style.
    pub fn token(&self) -> &'static str {
        match self.kind() {
            ErrorKind::ParseError => "#PARSE!",
            ErrorKind::EvaluationError => "#ERR!",
            ErrorKind::CircularReference => "#CYCLE!",
            ErrorKind::RecalculationBudgetExceeded => "#BUDGET!",
        }
    }

    /// Serializable view used by transports.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            cell: self.coordinate(),
            token: self.token(),
        }
    }
}

/// Flat, serializable description of an [`EngineError`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
    pub cell: Option<Coordinate>,
    pub token: &'static str,
}

fn format_path(path: &[Coordinate]) -> String {
    path.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

pub type Result<T> = std::result::Result<T, EngineError>;
