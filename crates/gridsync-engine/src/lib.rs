//! gridsync_engine - Formula grammar + Rhai integration.

pub mod builtins;
pub mod engine;
pub mod error;

pub use engine::{
    Coordinate, Evaluator, EvaluatorLimits, ParsedFormula, format_number, parse_formula,
    parse_numeric, strip_formula_marker,
};
pub use error::{EngineError, ErrorKind, ErrorReport, Result};
