//! Reference resolution against the store.
//!
//! Resolution runs in two phases. The gather phase walks references
//! breadth-first, fetching each wave of newly discovered cells with a single
//! batched store call. The evaluation phase then runs synchronously over the
//! gathered cells with a fresh [`EvaluationContext`], so no store call is ever
//! made while a context is live.

use std::collections::{HashMap, HashSet};

use log::trace;
use tokio::time::Instant;

use gridsync_engine::{Coordinate, EngineError, Evaluator, parse_formula};

use super::context::{EvaluationContext, GatheredCell};
use crate::error::Result;
use crate::storage::{CellStore, CellStoreAdapter, SheetId};

/// Resolves formulas and cells of one store.
pub struct Resolver<'a, S> {
    adapter: &'a CellStoreAdapter<S>,
    evaluator: &'a Evaluator,
    max_depth: usize,
    max_gathered: usize,
    deadline: Option<Instant>,
}

impl<'a, S: CellStore> Resolver<'a, S> {
    pub fn new(
        adapter: &'a CellStoreAdapter<S>,
        evaluator: &'a Evaluator,
        max_depth: usize,
        max_gathered: usize,
    ) -> Self {
        Resolver {
            adapter,
            evaluator,
            max_depth,
            max_gathered,
            deadline: None,
        }
    }

    /// Give up with a budget error once `deadline` has passed.
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Evaluate formula text in the context of `sheet` without persisting it.
    pub async fn evaluate_formula(&self, sheet: SheetId, formula: &str) -> Result<f64> {
        let parsed = parse_formula(formula)?;
        let cells = self.gather(sheet, parsed.references().to_vec()).await?;
        Ok(self.context(&cells).evaluate_parsed(&parsed)?)
    }

    /// Current value of the cell at `at`, computing its formula if it has one.
    pub async fn evaluate_cell(&self, sheet: SheetId, at: Coordinate) -> Result<f64> {
        let cells = self.gather(sheet, vec![at]).await?;
        Ok(self.context(&cells).resolve(at)?)
    }

    fn context<'c>(&'c self, cells: &'c HashMap<Coordinate, GatheredCell>) -> EvaluationContext<'c> {
        EvaluationContext::new(cells, self.evaluator, self.max_depth).with_deadline(self.deadline)
    }

    fn check_deadline(&self) -> std::result::Result<(), EngineError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(EngineError::budget("recalculation time budget exceeded"))
            }
            _ => Ok(()),
        }
    }

    /// Fetch every cell reachable from `roots` through formula references.
    async fn gather(
        &self,
        sheet: SheetId,
        roots: Vec<Coordinate>,
    ) -> Result<HashMap<Coordinate, GatheredCell>> {
        let mut cells: HashMap<Coordinate, GatheredCell> = HashMap::new();
        let mut queued: HashSet<Coordinate> = HashSet::new();
        let mut frontier: Vec<Coordinate> = roots.into_iter().filter(|c| queued.insert(*c)).collect();
        let mut waves = 0usize;

        while !frontier.is_empty() {
            self.check_deadline()?;
            if queued.len() > self.max_gathered {
                return Err(EngineError::budget(format!(
                    "formula reads more than {} cells",
                    self.max_gathered
                ))
                .into());
            }

            let fetched = self.adapter.fetch_many(sheet, &frontier).await?;
            waves += 1;

            let mut next = Vec::new();
            for (at, snapshot) in fetched {
                let gathered =
                    GatheredCell::from_parts(at, snapshot.content.as_deref(), snapshot.formula());
                if let GatheredCell::Formula(Ok(parsed)) = &gathered {
                    next.extend(
                        parsed
                            .references()
                            .iter()
                            .copied()
                            .filter(|c| queued.insert(*c)),
                    );
                }
                cells.insert(at, gathered);
            }
            frontier = next;
        }

        trace!(
            "gathered {} cells of {} in {} waves",
            cells.len(),
            sheet,
            waves
        );
        Ok(cells)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::storage::{MemoryStore, grd};
    use gridsync_engine::ErrorKind;
    use std::sync::Arc;

    const SHEET: SheetId = SheetId(1);

    fn cell(name: &str) -> Coordinate {
        name.parse().unwrap()
    }

    fn seeded(content: &str) -> (Arc<MemoryStore>, CellStoreAdapter<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        grd::seed(&store, SHEET, content).unwrap();
        let adapter = CellStoreAdapter::new(Arc::clone(&store));
        (store, adapter)
    }

    fn engine_kind(err: CoreError) -> ErrorKind {
        err.as_engine().map(EngineError::kind).expect("engine error")
    }

    #[tokio::test]
    async fn test_reference_free_formula() {
        let (_, adapter) = seeded("");
        let evaluator = Evaluator::new();
        let resolver = Resolver::new(&adapter, &evaluator, 64, 1000);
        assert_eq!(resolver.evaluate_formula(SHEET, "2+3*4").await.unwrap(), 14.0);
    }

    #[tokio::test]
    async fn test_missing_cells_are_zero() {
        let (_, adapter) = seeded("");
        let evaluator = Evaluator::new();
        let resolver = Resolver::new(&adapter, &evaluator, 64, 1000);
        assert_eq!(resolver.evaluate_formula(SHEET, "A1+5").await.unwrap(), 5.0);
    }

    #[tokio::test]
    async fn test_one_fetch_per_wave() {
        // C1 needs B1 and B2 (wave 2), both need A1 (wave 3)
        let (store, adapter) = seeded("A1: 1\nB1: =A1\nB2: =A1*2\nC1: =B1+B2\n");
        let evaluator = Evaluator::new();
        let resolver = Resolver::new(&adapter, &evaluator, 64, 1000);

        assert_eq!(resolver.evaluate_cell(SHEET, cell("C1")).await.unwrap(), 3.0);
        assert_eq!(store.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_cycle_through_store() {
        let (_, adapter) = seeded("A1: =C1\nB1: =A1\nC1: =B1\n");
        let evaluator = Evaluator::new();
        let resolver = Resolver::new(&adapter, &evaluator, 64, 1000);

        let err = resolver.evaluate_formula(SHEET, "A1 + 1").await.unwrap_err();
        assert_eq!(engine_kind(err), ErrorKind::CircularReference);
    }

    #[tokio::test]
    async fn test_gather_bound_is_a_budget_error() {
        let (_, adapter) = seeded("");
        let evaluator = Evaluator::new();
        let resolver = Resolver::new(&adapter, &evaluator, 64, 10);

        let err = resolver
            .evaluate_formula(SHEET, "SUM(A1:A20)")
            .await
            .unwrap_err();
        assert_eq!(engine_kind(err), ErrorKind::RecalculationBudgetExceeded);
    }

    #[tokio::test]
    async fn test_wide_fan_in_is_gathered_once_per_cell() {
        let mut seed = String::new();
        for row in 1..=300 {
            seed.push_str(&format!("A{row}: 1\nB{row}: =SUM(A1:A300)\n"));
        }
        seed.push_str("C1: =SUM(B1:B300)\n");
        let (store, adapter) = seeded(&seed);
        let evaluator = Evaluator::new();
        let resolver = Resolver::new(&adapter, &evaluator, 64, 1000);

        assert_eq!(resolver.evaluate_cell(SHEET, cell("C1")).await.unwrap(), 90000.0);
        assert_eq!(store.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_passed_deadline_fails_formula() {
        let (_, adapter) = seeded("A1: 1\nB1: =A1*2\n");
        let evaluator = Evaluator::new();
        let resolver =
            Resolver::new(&adapter, &evaluator, 64, 1000).with_deadline(Some(Instant::now()));

        for formula in ["B1 + 1", "1 + 1"] {
            let err = resolver.evaluate_formula(SHEET, formula).await.unwrap_err();
            assert_eq!(engine_kind(err), ErrorKind::RecalculationBudgetExceeded);
        }
    }

    #[tokio::test]
    async fn test_parse_error_in_precedent_names_it() {
        let (_, adapter) = seeded("A1: =(1+\nB1: =A1*2\n");
        let evaluator = Evaluator::new();
        let resolver = Resolver::new(&adapter, &evaluator, 64, 1000);

        let err = resolver.evaluate_cell(SHEET, cell("B1")).await.unwrap_err();
        let err = err.as_engine().unwrap();
        assert_eq!(err.kind(), ErrorKind::ParseError);
        assert_eq!(err.coordinate(), Some(cell("A1")));
    }

    #[tokio::test]
    async fn test_store_failure_aborts() {
        let (store, adapter) = seeded("A1: 1\n");
        store.set_unavailable(true);
        let evaluator = Evaluator::new();
        let resolver = Resolver::new(&adapter, &evaluator, 64, 1000);

        let err = resolver.evaluate_formula(SHEET, "A1").await.unwrap_err();
        assert!(matches!(err, CoreError::Store(_)));
    }
}
