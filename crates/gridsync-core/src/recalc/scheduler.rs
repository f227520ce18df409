//! Recalculation on write.
//!
//! A write updates the edited cell's dependency edges, evaluates it, then
//! recomputes every cell that transitively depends on it, breadth-first. The
//! returned batch lists the edited cell first and each dependent once.
//!
//! Writes to one sheet are serialized by that sheet's gate; different sheets
//! proceed independently.
//!
//! A write that exceeds its closure or time budget is undone: the edited
//! cell's stored content, formula and edges are put back, no dependent is
//! touched and nothing is published.

use std::sync::Arc;

use dashmap::DashMap;
use log::{debug, warn};
use serde::{Serialize, Serializer};
use tokio::sync::{Mutex, broadcast};
use tokio::time::Instant;

use gridsync_engine::{Coordinate, EngineError, ErrorReport, Evaluator, format_number, parse_formula};

use super::graph::DependencyGraph;
use super::resolver::Resolver;
use crate::config::RecalcConfig;
use crate::error::{CoreError, Result};
use crate::events::{ChangeFeed, SheetChange};
use crate::storage::{CellSnapshot, CellStore, CellStoreAdapter, SheetId};

/// Outcome for one cell of a write batch.
#[derive(Clone, Debug, PartialEq)]
pub struct CellResult {
    pub coordinate: Coordinate,
    pub outcome: std::result::Result<f64, EngineError>,
}

impl CellResult {
    pub fn value(&self) -> Option<f64> {
        self.outcome.as_ref().ok().copied()
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The value as stored, or the error marker.
    pub fn display(&self) -> String {
        match &self.outcome {
            Ok(value) => format_number(*value),
            Err(err) => err.token().to_string(),
        }
    }

    pub fn report(&self) -> CellReport {
        CellReport {
            cell: self.coordinate,
            value: self.value(),
            display: self.display(),
            error: self.outcome.as_ref().err().map(EngineError::report),
        }
    }
}

impl Serialize for CellResult {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> std::result::Result<Ser::Ok, Ser::Error> {
        self.report().serialize(serializer)
    }
}

/// Wire form of a [`CellResult`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CellReport {
    pub cell: Coordinate,
    pub value: Option<f64>,
    pub display: String,
    pub error: Option<ErrorReport>,
}

#[derive(Debug)]
enum Write<'w> {
    Formula(&'w str),
    ClearFormula,
    Content(Option<String>),
}

/// Recalculation entry point for one store.
pub struct Recalculator<S> {
    adapter: CellStoreAdapter<S>,
    graph: Arc<DependencyGraph>,
    evaluator: Evaluator,
    config: RecalcConfig,
    gates: DashMap<SheetId, Arc<Mutex<()>>>,
    feed: ChangeFeed,
}

impl<S: CellStore> Recalculator<S> {
    pub fn new(store: Arc<S>, config: RecalcConfig) -> Self {
        Self::with_graph(store, Arc::new(DependencyGraph::new()), config)
    }

    /// Build around an existing (possibly shared) dependency graph.
    pub fn with_graph(store: Arc<S>, graph: Arc<DependencyGraph>, config: RecalcConfig) -> Self {
        Recalculator {
            adapter: CellStoreAdapter::new(store),
            graph,
            evaluator: Evaluator::with_limits(config.evaluator_limits()),
            feed: ChangeFeed::new(config.feed_capacity),
            gates: DashMap::new(),
            config,
        }
    }

    pub fn graph(&self) -> &Arc<DependencyGraph> {
        &self.graph
    }

    pub fn config(&self) -> &RecalcConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        self.adapter.store()
    }

    /// Receive every completed write batch from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SheetChange> {
        self.feed.subscribe()
    }

    fn resolver(&self, deadline: Option<Instant>) -> Resolver<'_, S> {
        Resolver::new(
            &self.adapter,
            &self.evaluator,
            self.config.max_depth,
            self.config.max_gathered_cells,
        )
        .with_deadline(deadline)
    }

    /// Evaluate formula text against `sheet` without storing anything.
    ///
    /// Bounded by the same time budget as a write.
    pub async fn evaluate_formula(&self, sheet: SheetId, formula: &str) -> Result<f64> {
        let deadline = Instant::now().checked_add(self.config.time_budget());
        self.resolver(deadline).evaluate_formula(sheet, formula).await
    }

    /// React to a cell's formula being created, changed or removed (`None`).
    ///
    /// Formula and formula-level failures are reported inside the batch: a
    /// failing edited cell yields a one-entry batch, a failing dependent gets
    /// its own error entry. Store failures and exceeded budgets fail the call,
    /// and an exceeded budget leaves the store and graph as they were.
    pub async fn on_cell_written(
        &self,
        sheet: SheetId,
        at: Coordinate,
        formula: Option<&str>,
    ) -> Result<Vec<CellResult>> {
        let write = match formula.map(str::trim).filter(|f| !f.is_empty()) {
            Some(formula) => Write::Formula(formula),
            None => Write::ClearFormula,
        };
        self.write(sheet, at, write).await
    }

    /// Store raw user input: `=...` is a formula, anything else is content.
    pub async fn write_input(
        &self,
        sheet: SheetId,
        at: Coordinate,
        input: &str,
    ) -> Result<Vec<CellResult>> {
        let input = input.trim();
        let write = match input.strip_prefix('=') {
            Some(formula) => Write::Formula(formula.trim()),
            None if input.is_empty() => Write::Content(None),
            None => Write::Content(Some(input.to_string())),
        };
        self.write(sheet, at, write).await
    }

    /// Reload `sheet`'s edges from its stored formulas. Returns the number of
    /// formula cells now tracked.
    pub async fn rebuild_sheet(&self, sheet: SheetId) -> Result<usize> {
        let gate = self.gate(sheet);
        let _guard = gate.lock().await;

        let formulas = self.store().formula_cells(sheet).await?;
        let mut edges = Vec::with_capacity(formulas.len());
        for (at, formula) in formulas {
            match parse_formula(&formula) {
                Ok(parsed) => edges.push((at, parsed.reference_set())),
                Err(err) => warn!("{}: not tracking {}: {}", sheet, at, err),
            }
        }

        let candidates = edges.len();
        let rejected = self.graph.rebuild_sheet(sheet, edges);
        for at in &rejected {
            warn!("{}: not tracking {}: formula references itself", sheet, at);
        }
        debug!(
            "{}: rebuilt {} edges for {} formula cells",
            sheet,
            self.graph.edge_count(sheet),
            candidates - rejected.len()
        );
        Ok(candidates - rejected.len())
    }

    /// Forget a deleted sheet.
    pub fn remove_sheet(&self, sheet: SheetId) {
        self.graph.remove_sheet(sheet);
        self.gates.remove(&sheet);
    }

    fn gate(&self, sheet: SheetId) -> Arc<Mutex<()>> {
        self.gates.entry(sheet).or_default().clone()
    }

    async fn write(&self, sheet: SheetId, at: Coordinate, write: Write<'_>) -> Result<Vec<CellResult>> {
        let gate = self.gate(sheet);
        let _guard = gate.lock().await;
        let started = Instant::now();
        let deadline = started.checked_add(self.config.time_budget());
        debug!("{}: write {} {:?}", sheet, at, write);

        let closure = self
            .graph
            .transitive_dependents(sheet, at, self.config.max_closure_cells)?;
        let prior = self.store().get_cell(sheet, at).await?.unwrap_or_default();
        let prior_edges = self.graph.precedents_of(sheet, at);

        match self.apply(sheet, at, write, &prior, closure, deadline).await {
            Ok(results) => {
                debug!(
                    "{}: write {} recalculated {} cells in {:?}",
                    sheet,
                    at,
                    results.len(),
                    started.elapsed()
                );
                self.publish(sheet, &results);
                Ok(results)
            }
            Err(err) => {
                warn!("{}: write {} undone: {}", sheet, at, err);
                self.restore(sheet, at, prior, prior_edges).await;
                Err(match err {
                    CoreError::Engine(err) => err.at(at).into(),
                    other => other,
                })
            }
        }
    }

    /// Persist the write and recompute `closure`. Derived contents are only
    /// stored once every cell has been evaluated.
    async fn apply(
        &self,
        sheet: SheetId,
        at: Coordinate,
        write: Write<'_>,
        prior: &CellSnapshot,
        closure: Vec<Coordinate>,
        deadline: Option<Instant>,
    ) -> Result<Vec<CellResult>> {
        let store = self.store();
        let resolver = self.resolver(deadline);
        let is_formula = matches!(write, Write::Formula(_));
        let edges = match write {
            Write::Formula(formula) => {
                store
                    .save_cell(sheet, at, None, Some(formula.to_string()))
                    .await?;
                self.commit_edges(sheet, at, formula)
            }
            Write::ClearFormula => {
                store.save_cell(sheet, at, prior.content.clone(), None).await?;
                self.graph.clear_edges(sheet, at);
                Ok(())
            }
            Write::Content(content) => {
                store.save_cell(sheet, at, content, None).await?;
                self.graph.clear_edges(sheet, at);
                Ok(())
            }
        };

        let evaluated = match edges {
            Ok(()) => resolver.evaluate_cell(sheet, at).await,
            Err(err) => Err(err.into()),
        };
        let value = match evaluated {
            Ok(value) => value,
            Err(CoreError::Engine(_)) if expired(deadline) => return Err(self.overran(at)),
            Err(CoreError::Engine(err)) => {
                let err = err.at(at);
                debug!("{}: {} failed: {}", sheet, at, err);
                return Ok(vec![CellResult {
                    coordinate: at,
                    outcome: Err(err),
                }]);
            }
            Err(other) => return Err(other),
        };

        let mut results = Vec::with_capacity(closure.len() + 1);
        results.push(CellResult {
            coordinate: at,
            outcome: Ok(value),
        });
        for dependent in closure {
            if expired(deadline) {
                return Err(self.overran(at));
            }
            let outcome = match resolver.evaluate_cell(sheet, dependent).await {
                Ok(value) => Ok(value),
                Err(CoreError::Engine(_)) if expired(deadline) => return Err(self.overran(at)),
                Err(CoreError::Engine(err)) => {
                    warn!("{}: dependent {} of {} failed: {}", sheet, dependent, at, err);
                    Err(err.at(dependent))
                }
                Err(other) => return Err(other),
            };
            results.push(CellResult {
                coordinate: dependent,
                outcome,
            });
        }

        if is_formula {
            store
                .save_content(sheet, at, Some(format_number(value)))
                .await?;
        }
        for result in &results[1..] {
            store
                .save_content(sheet, result.coordinate, result.value().map(format_number))
                .await?;
        }
        Ok(results)
    }

    /// Put back the edited cell as it was before a failed write.
    async fn restore(&self, sheet: SheetId, at: Coordinate, prior: CellSnapshot, edges: Vec<Coordinate>) {
        if let Err(err) = self
            .store()
            .save_cell(sheet, at, prior.content, prior.formula)
            .await
        {
            warn!("{}: could not restore {}: {}", sheet, at, err);
        }
        if let Err(err) = self.graph.set_edges(sheet, at, edges.into_iter().collect()) {
            warn!("{}: could not restore edges of {}: {}", sheet, at, err);
        }
    }

    fn overran(&self, at: Coordinate) -> CoreError {
        EngineError::budget(format!(
            "recalculation after writing {} exceeded {} ms",
            at, self.config.time_budget_ms
        ))
        .at(at)
        .into()
    }

    /// Replace the edited cell's edges. A parse failure leaves it with none.
    fn commit_edges(&self, sheet: SheetId, at: Coordinate, formula: &str) -> std::result::Result<(), EngineError> {
        self.graph.clear_edges(sheet, at);
        let parsed = parse_formula(formula).map_err(|e| e.at(at))?;
        self.graph.set_edges(sheet, at, parsed.reference_set())
    }

    fn publish(&self, sheet: SheetId, results: &[CellResult]) {
        self.feed.publish(SheetChange {
            sheet,
            results: results.to_vec(),
        });
    }
}

fn expired(deadline: Option<Instant>) -> bool {
    deadline.is_some_and(|deadline| Instant::now() >= deadline)
}
