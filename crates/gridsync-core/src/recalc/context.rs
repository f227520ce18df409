//! Per-evaluation state: the current reference path and memoized values.

use std::collections::{HashMap, HashSet};

use log::trace;
use tokio::time::Instant;

use gridsync_engine::{Coordinate, EngineError, Evaluator, ParsedFormula, parse_numeric};

/// A cell as the resolver gathered it from the store.
#[derive(Clone, Debug)]
pub(crate) enum GatheredCell {
    /// Plain content, already converted to its numeric value.
    Value(f64),
    /// A formula cell, parsed (or the parse failure, tagged with the cell).
    Formula(Result<ParsedFormula, EngineError>),
}

impl GatheredCell {
    pub(crate) fn from_parts(at: Coordinate, content: Option<&str>, formula: Option<&str>) -> Self {
        match formula {
            Some(formula) => {
                GatheredCell::Formula(gridsync_engine::parse_formula(formula).map_err(|e| e.at(at)))
            }
            None => GatheredCell::Value(parse_numeric(content)),
        }
    }
}

/// State for one top-level evaluation.
///
/// Only the cells on the current recursion path count towards a cycle; a cell
/// reached twice through different paths is resolved once and memoized.
pub(crate) struct EvaluationContext<'a> {
    cells: &'a HashMap<Coordinate, GatheredCell>,
    evaluator: &'a Evaluator,
    max_depth: usize,
    deadline: Option<Instant>,
    path: Vec<Coordinate>,
    on_path: HashSet<Coordinate>,
    memo: HashMap<Coordinate, f64>,
}

impl<'a> EvaluationContext<'a> {
    pub(crate) fn new(
        cells: &'a HashMap<Coordinate, GatheredCell>,
        evaluator: &'a Evaluator,
        max_depth: usize,
    ) -> Self {
        EvaluationContext {
            cells,
            evaluator,
            max_depth,
            deadline: None,
            path: Vec::new(),
            on_path: HashSet::new(),
            memo: HashMap::new(),
        }
    }

    /// Fail any formula evaluation that starts after `deadline`.
    pub(crate) fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Numeric value of `at`, evaluating its formula if it has one.
    pub(crate) fn resolve(&mut self, at: Coordinate) -> Result<f64, EngineError> {
        if self.on_path.contains(&at) {
            let start = self.path.iter().position(|c| *c == at).unwrap_or(0);
            let mut path = self.path[start..].to_vec();
            path.push(at);
            return Err(EngineError::CircularReference { origin: at, path });
        }
        if let Some(value) = self.memo.get(&at) {
            return Ok(*value);
        }

        let cells = self.cells;
        let value = match cells.get(&at) {
            None => 0.0,
            Some(GatheredCell::Value(value)) => *value,
            Some(GatheredCell::Formula(Err(err))) => return Err(err.clone()),
            Some(GatheredCell::Formula(Ok(parsed))) => {
                if self.path.len() >= self.max_depth {
                    let root = self.path.first().copied().unwrap_or(at);
                    if let Some(path) = self.find_cycle(root) {
                        return Err(EngineError::CircularReference {
                            origin: path[0],
                            path,
                        });
                    }
                    return Err(EngineError::budget(format!(
                        "reference chain deeper than {}",
                        self.max_depth
                    ))
                    .at(at));
                }
                self.path.push(at);
                self.on_path.insert(at);
                let result = self.evaluate_parsed(parsed);
                self.on_path.remove(&at);
                self.path.pop();
                result.map_err(|e| e.at(at))?
            }
        };

        trace!("resolved {} = {}", at, value);
        self.memo.insert(at, value);
        Ok(value)
    }

    /// Resolve every reference of `parsed`, substitute and evaluate.
    pub(crate) fn evaluate_parsed(&mut self, parsed: &ParsedFormula) -> Result<f64, EngineError> {
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(EngineError::budget("recalculation time budget exceeded"));
        }
        let mut values = HashMap::with_capacity(parsed.references().len());
        for reference in parsed.references() {
            values.insert(*reference, self.resolve(*reference)?);
        }
        let expression = parsed.substitute(|c| values.get(&c).copied().unwrap_or(0.0));
        self.evaluator.evaluate(&expression)
    }

    /// First cycle reachable from `root` through gathered formulas, as a path
    /// that starts and ends on the same cell.
    ///
    /// Iterative, so a chain too deep for [`resolve`](Self::resolve) can still
    /// be told apart from a long cycle.
    fn find_cycle(&self, root: Coordinate) -> Option<Vec<Coordinate>> {
        let mut stack: Vec<(Coordinate, usize)> = vec![(root, 0)];
        let mut on_stack = HashSet::from([root]);
        let mut done = HashSet::new();

        while let Some((at, next)) = stack.last_mut() {
            let at = *at;
            let Some(reference) = self.references_of(at).get(*next).copied() else {
                stack.pop();
                on_stack.remove(&at);
                done.insert(at);
                continue;
            };
            *next += 1;

            if on_stack.contains(&reference) {
                let start = stack.iter().position(|(c, _)| *c == reference).unwrap_or(0);
                let mut path: Vec<Coordinate> = stack[start..].iter().map(|(c, _)| *c).collect();
                path.push(reference);
                return Some(path);
            }
            if !done.contains(&reference) {
                on_stack.insert(reference);
                stack.push((reference, 0));
            }
        }
        None
    }

    fn references_of(&self, at: Coordinate) -> &[Coordinate] {
        match self.cells.get(&at) {
            Some(GatheredCell::Formula(Ok(parsed))) => parsed.references(),
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsync_engine::ErrorKind;

    fn cell(name: &str) -> Coordinate {
        name.parse().unwrap()
    }

    fn sheet(entries: &[(&str, &str)]) -> HashMap<Coordinate, GatheredCell> {
        entries
            .iter()
            .map(|(name, input)| {
                let at = cell(name);
                let gathered = match input.strip_prefix('=') {
                    Some(formula) => GatheredCell::from_parts(at, None, Some(formula)),
                    None => GatheredCell::from_parts(at, Some(*input), None),
                };
                (at, gathered)
            })
            .collect()
    }

    #[test]
    fn test_chain_resolves_transitively() {
        let cells = sheet(&[("A1", "2"), ("B1", "=A1*3"), ("C1", "=B1+A1")]);
        let evaluator = Evaluator::new();
        let mut ctx = EvaluationContext::new(&cells, &evaluator, 16);
        assert_eq!(ctx.resolve(cell("C1")).unwrap(), 8.0);
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let cells = sheet(&[("A1", "1"), ("B1", "=A1"), ("B2", "=A1"), ("C1", "=B1+B2")]);
        let evaluator = Evaluator::new();
        let mut ctx = EvaluationContext::new(&cells, &evaluator, 16);
        assert_eq!(ctx.resolve(cell("C1")).unwrap(), 2.0);
    }

    #[test]
    fn test_cycle_reports_path_from_origin() {
        let cells = sheet(&[("A1", "=B1"), ("B1", "=C1"), ("C1", "=A1")]);
        let evaluator = Evaluator::new();
        let mut ctx = EvaluationContext::new(&cells, &evaluator, 16);
        let err = ctx.resolve(cell("A1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircularReference);
        assert_eq!(
            err.to_string(),
            "Circular reference at A1: A1 -> B1 -> C1 -> A1"
        );
    }

    #[test]
    fn test_depth_limit_is_a_budget_error() {
        let cells = sheet(&[("A1", "=A2"), ("A2", "=A3"), ("A3", "=A4"), ("A4", "1")]);
        let evaluator = Evaluator::new();
        let mut ctx = EvaluationContext::new(&cells, &evaluator, 2);
        let err = ctx.resolve(cell("A1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecalculationBudgetExceeded);
        assert_eq!(err.coordinate(), Some(cell("A3")));
    }

    #[test]
    fn test_cycle_longer_than_depth_limit_is_still_a_cycle() {
        let names: Vec<String> = (1..=40).map(|row| format!("A{row}")).collect();
        let formulas: Vec<String> = (1..=40).map(|row| format!("=A{}", row % 40 + 1)).collect();
        let entries: Vec<(&str, &str)> = names
            .iter()
            .zip(&formulas)
            .map(|(name, formula)| (name.as_str(), formula.as_str()))
            .collect();
        let cells = sheet(&entries);
        let evaluator = Evaluator::new();
        let mut ctx = EvaluationContext::new(&cells, &evaluator, 8);

        let err = ctx.resolve(cell("A1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircularReference);
        assert_eq!(err.coordinate(), Some(cell("A1")));
        match err {
            EngineError::CircularReference { path, .. } => {
                assert_eq!(path.len(), 41);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_cycle_below_a_long_chain_is_found() {
        let cells = sheet(&[
            ("A1", "=A2"),
            ("A2", "=A3"),
            ("A3", "=A4"),
            ("A4", "=B1"),
            ("B1", "=B2"),
            ("B2", "=B1"),
        ]);
        let evaluator = Evaluator::new();
        let mut ctx = EvaluationContext::new(&cells, &evaluator, 2);
        let err = ctx.resolve(cell("A1")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Circular reference at B1: B1 -> B2 -> B1"
        );
    }

    #[test]
    fn test_passed_deadline_is_a_budget_error() {
        let cells = sheet(&[("A1", "2"), ("B1", "=A1*3")]);
        let evaluator = Evaluator::new();
        let mut ctx =
            EvaluationContext::new(&cells, &evaluator, 16).with_deadline(Some(Instant::now()));
        let err = ctx.resolve(cell("B1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecalculationBudgetExceeded);
        assert_eq!(err.coordinate(), Some(cell("B1")));

        // plain values need no evaluation
        assert_eq!(ctx.resolve(cell("A1")).unwrap(), 2.0);
    }

    #[test]
    fn test_missing_and_text_cells_are_zero() {
        let cells = sheet(&[("A1", "label"), ("B1", "=A1+Z99+5")]);
        let evaluator = Evaluator::new();
        let mut ctx = EvaluationContext::new(&cells, &evaluator, 16);
        assert_eq!(ctx.resolve(cell("B1")).unwrap(), 5.0);
    }

    #[test]
    fn test_error_in_precedent_names_that_cell() {
        let cells = sheet(&[("A1", "=1/0"), ("B1", "=A1+1")]);
        let evaluator = Evaluator::new();
        let mut ctx = EvaluationContext::new(&cells, &evaluator, 16);
        let err = ctx.resolve(cell("B1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EvaluationError);
        assert_eq!(err.coordinate(), Some(cell("A1")));
    }
}
