//! Rhai engine creation and expression evaluation.
//!
//! Formulas reach this module only after every reference has been replaced by
//! a number, so evaluation is a pure function of the expression text. Any
//! failure reported by Rhai (syntax, unknown function, runtime error, limits)
//! is translated into [`EngineError::Evaluation`] carrying Rhai's message.

use rhai::{Dynamic, Engine};

use crate::error::{EngineError, Result};

/// Resource limits applied to every evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvaluatorLimits {
    /// Maximum number of Rhai operations per expression.
    pub max_operations: u64,
    /// Maximum nesting depth of a single expression.
    pub max_expr_depth: usize,
}

impl Default for EvaluatorLimits {
    fn default() -> Self {
        EvaluatorLimits {
            max_operations: 1_000_000,
            max_expr_depth: 128,
        }
    }
}

/// Evaluates substituted formula expressions to numbers.
///
/// The underlying engine is built with the `sync` feature, so one evaluator
/// can be shared across tasks.
pub struct Evaluator {
    engine: Engine,
}

impl Evaluator {
    /// Create an evaluator with default limits and built-ins registered.
    pub fn new() -> Self {
        Self::with_limits(EvaluatorLimits::default())
    }

    pub fn with_limits(limits: EvaluatorLimits) -> Self {
        Evaluator {
            engine: create_engine(limits),
        }
    }

    /// Evaluate an expression with no remaining cell references.
    ///
    /// Booleans evaluate to `1` or `0`. Non-numeric results and non-finite
    /// numbers (division by zero, overflow) are evaluation errors.
    pub fn evaluate(&self, expression: &str) -> Result<f64> {
        let value = self
            .engine
            .eval_expression::<Dynamic>(expression)
            .map_err(|e| EngineError::evaluation(e.to_string()))?;
        dynamic_to_number(&value)
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a Rhai engine with limits and built-ins registered.
pub fn create_engine(limits: EvaluatorLimits) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(limits.max_operations);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    crate::builtins::register_builtins(&mut engine);
    engine
}

fn dynamic_to_number(value: &Dynamic) -> Result<f64> {
    let n = if let Ok(n) = value.as_float() {
        n
    } else if let Ok(n) = value.as_int() {
        n as f64
    } else if let Ok(b) = value.as_bool() {
        if b { 1.0 } else { 0.0 }
    } else {
        return Err(EngineError::evaluation(format!(
            "formula produced a non-numeric value of type {}",
            value.type_name()
        )));
    };

    if n.is_finite() {
        Ok(n)
    } else if n.is_nan() {
        Err(EngineError::evaluation("result is not a number"))
    } else {
        Err(EngineError::evaluation("division by zero or numeric overflow"))
    }
}
