//! Formula engine API.
//!
//! This module provides the stateless computation pieces:
//!
//! - [`Coordinate`] - Cell addresses (A1 notation <-> 1-based row/col)
//! - [`parse_formula`] - Reference grammar producing a [`ParsedFormula`] template
//! - [`Evaluator`] - Rhai-backed evaluation of substituted expressions
//! - [`format_number`], [`parse_numeric`] - Value formatting and content parsing

mod coordinate;
mod eval;
mod format;
mod grammar;

pub use coordinate::{Coordinate, MAX_COLUMN, MAX_ROW};
pub use eval::{Evaluator, EvaluatorLimits, create_engine};
pub use format::{format_number, parse_numeric};
pub use grammar::{
    MAX_RANGE_CELLS, ParsedFormula, Segment, parse_formula, render_number, strip_formula_marker,
};
