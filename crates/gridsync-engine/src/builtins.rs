//! Built-in spreadsheet functions (Rust) and their metadata.
//!
//! Conventions:
//! - Spreadsheet-facing built-in names are ALL CAPS (e.g. `SUM`, `AVG`).
//!   The grammar upper-cases function names, so `sum(A1:A3)` works too.
//! - Ranges arrive as Rhai arrays of floats (`SUM([1.0, 2.0])`).
//! - Aggregates take any mix of values and ranges: the grammar wraps their
//!   argument list in one array, which may nest (`SUM([1.0, [2.0, 3.0]])`).
//! - If you add a built-in, list it in `BUILTINS` and register it in
//!   `register_builtins`; aggregates also go in `AGGREGATES`.

use rhai::{Array, Dynamic, Engine, EvalAltResult, Position};

pub struct Builtin {
    pub name: &'static str,
    pub signature: &'static str,
    pub description: &'static str,
}

pub const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "SUM",
        signature: "SUM(value or range, ...)",
        description: "Sum of all values",
    },
    Builtin {
        name: "AVG",
        signature: "AVG(value or range, ...)",
        description: "Average of all values (alias: AVERAGE)",
    },
    Builtin {
        name: "MIN",
        signature: "MIN(value or range, ...)",
        description: "Smallest value",
    },
    Builtin {
        name: "MAX",
        signature: "MAX(value or range, ...)",
        description: "Largest value",
    },
    Builtin {
        name: "COUNT",
        signature: "COUNT(value or range, ...)",
        description: "Number of values; empty cells count as zero",
    },
    Builtin {
        name: "ABS",
        signature: "ABS(x)",
        description: "Absolute value",
    },
    Builtin {
        name: "ROUND",
        signature: "ROUND(x) | ROUND(x, digits)",
        description: "Round half away from zero",
    },
    Builtin {
        name: "POW",
        signature: "POW(base, exp)",
        description: "Exponentiation (same as base ^ exp)",
    },
    Builtin {
        name: "SQRT",
        signature: "SQRT(x)",
        description: "Square root",
    },
    Builtin {
        name: "IF",
        signature: "IF(condition, then, else)",
        description: "Pick a value; non-zero numbers count as true",
    },
];

/// Functions whose arguments the grammar collects into a single array.
pub const AGGREGATES: &[&str] = &["SUM", "AVG", "AVERAGE", "MIN", "MAX", "COUNT"];

pub fn is_aggregate(name: &str) -> bool {
    AGGREGATES.contains(&name)
}

fn invalid_arg(message: &str) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(message.into(), Position::NONE).into()
}

fn numbers(values: &Array) -> Result<Vec<f64>, Box<EvalAltResult>> {
    let mut out = Vec::with_capacity(values.len());
    collect_numbers(values, &mut out)?;
    Ok(out)
}

fn collect_numbers(values: &Array, out: &mut Vec<f64>) -> Result<(), Box<EvalAltResult>> {
    for v in values {
        if let Ok(n) = v.as_float() {
            out.push(n);
        } else if let Ok(n) = v.as_int() {
            out.push(n as f64);
        } else if let Some(inner) = v.read_lock::<Array>() {
            collect_numbers(&inner, out)?;
        } else {
            return Err(invalid_arg(&format!(
                "expected a number, found {}",
                v.type_name()
            )));
        }
    }
    Ok(())
}

fn average(values: &Array) -> Result<f64, Box<EvalAltResult>> {
    let values = numbers(values)?;
    if values.is_empty() {
        return Err(invalid_arg("AVG of an empty range"));
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

fn round_to(x: f64, digits: f64) -> Result<f64, Box<EvalAltResult>> {
    const MAX_DIGITS: f64 = 12.0;
    if digits.fract() != 0.0 || digits.abs() > MAX_DIGITS {
        return Err(invalid_arg(&format!(
            "digits must be a whole number between -{MAX_DIGITS} and {MAX_DIGITS}"
        )));
    }
    let factor = 10f64.powi(digits as i32);
    Ok((x * factor).round() / factor)
}

/// Register all built-in functions into the Rhai engine.
pub fn register_builtins(engine: &mut Engine) {
    // SUM(values)
    engine.register_fn("SUM", |values: Array| -> Result<f64, Box<EvalAltResult>> {
        Ok(numbers(&values)?.iter().sum())
    });

    // AVG(values) / AVERAGE(values)
    engine.register_fn("AVG", |values: Array| average(&values));
    engine.register_fn("AVERAGE", |values: Array| average(&values));

    // MIN / MAX over values, or a pair of scalars when called directly
    engine.register_fn("MIN", |values: Array| -> Result<f64, Box<EvalAltResult>> {
        numbers(&values)?
            .into_iter()
            .reduce(f64::min)
            .ok_or_else(|| invalid_arg("MIN of an empty range"))
    });
    engine.register_fn("MIN", |a: f64, b: f64| -> f64 { a.min(b) });
    engine.register_fn("MAX", |values: Array| -> Result<f64, Box<EvalAltResult>> {
        numbers(&values)?
            .into_iter()
            .reduce(f64::max)
            .ok_or_else(|| invalid_arg("MAX of an empty range"))
    });
    engine.register_fn("MAX", |a: f64, b: f64| -> f64 { a.max(b) });

    // COUNT(values): every cell counts, empty cells resolve to zero
    engine.register_fn("COUNT", |values: Array| -> Result<f64, Box<EvalAltResult>> {
        Ok(numbers(&values)?.len() as f64)
    });

    engine.register_fn("ABS", |x: f64| -> f64 { x.abs() });
    engine.register_fn("ROUND", |x: f64| -> f64 { x.round() });
    engine.register_fn("ROUND", round_to);
    engine.register_fn("POW", |base: f64, exp: f64| -> f64 { base.powf(exp) });
    engine.register_fn("SQRT", |x: f64| -> f64 { x.sqrt() });

    // IF(condition, then, else): both branches are evaluated eagerly
    engine.register_fn("IF", |cond: bool, then: f64, otherwise: f64| -> f64 {
        if cond { then } else { otherwise }
    });
    engine.register_fn("IF", |cond: f64, then: f64, otherwise: f64| -> f64 {
        if cond != 0.0 { then } else { otherwise }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Evaluator;

    #[test]
    fn test_every_listed_builtin_is_registered() {
        let evaluator = Evaluator::new();
        for builtin in BUILTINS {
            let call = match builtin.name {
                "SUM" | "AVG" | "COUNT" => format!("{}([1.0, 2.0])", builtin.name),
                "MIN" | "MAX" | "POW" | "ROUND" => format!("{}(4.0, 1.0)", builtin.name),
                "IF" => "IF(true, 1.0, 2.0)".to_string(),
                name => format!("{}(4.0)", name),
            };
            assert!(
                evaluator.evaluate(&call).is_ok(),
                "{} is not callable as {}",
                builtin.name,
                call
            );
        }
    }

    #[test]
    fn test_aggregates() {
        let evaluator = Evaluator::new();
        assert_eq!(evaluator.evaluate("SUM([1.0, 2.0, 3.5])").unwrap(), 6.5);
        assert_eq!(evaluator.evaluate("AVERAGE([1.0, 2.0, 3.0])").unwrap(), 2.0);
        assert_eq!(evaluator.evaluate("MIN([3.0, -1.0, 2.0])").unwrap(), -1.0);
        assert_eq!(evaluator.evaluate("MAX(3.0, 7.0)").unwrap(), 7.0);
        assert_eq!(evaluator.evaluate("COUNT([0.0, 0.0, 0.0])").unwrap(), 3.0);
    }

    #[test]
    fn test_round_and_if() {
        let evaluator = Evaluator::new();
        assert_eq!(evaluator.evaluate("ROUND(2.3456, 2.0)").unwrap(), 2.35);
        assert_eq!(evaluator.evaluate("ROUND(-2.5)").unwrap(), -3.0);
        assert_eq!(evaluator.evaluate("IF(2.0 > 1.0, 10.0, 20.0)").unwrap(), 10.0);
        assert_eq!(evaluator.evaluate("IF(0.0, 10.0, 20.0)").unwrap(), 20.0);
        assert!(evaluator.evaluate("ROUND(1.0, 0.5)").is_err());
    }

    #[test]
    fn test_aggregates_flatten_nested_ranges() {
        let evaluator = Evaluator::new();
        assert_eq!(evaluator.evaluate("SUM([1.0, [2.0, 3.0], 4.0])").unwrap(), 10.0);
        assert_eq!(evaluator.evaluate("COUNT([[0.0, 0.0], 5.0])").unwrap(), 3.0);
        assert_eq!(evaluator.evaluate("MAX([[1.0, 9.0], 2.0])").unwrap(), 9.0);
        assert!(evaluator.evaluate("SUM([1.0, true])").is_err());
        assert!(is_aggregate("AVERAGE"));
        assert!(!is_aggregate("IF"));
    }

    #[test]
    fn test_sqrt_of_negative_is_an_error() {
        assert!(Evaluator::new().evaluate("SQRT(-1.0)").is_err());
    }
}
