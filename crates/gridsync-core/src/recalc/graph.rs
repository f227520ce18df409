//! Process-wide dependency graph, partitioned by sheet.
//!
//! ```text
//! A -> B  means  "B depends on A"  (A is a precedent of B)
//! ```
//!
//! Each sheet keeps both directions:
//! - `precedents[B]` = cells B's formula reads
//! - `dependents[A]` = formula cells that read A
//!
//! The two maps always mirror each other and never hold empty sets. All access
//! to one sheet goes through its map entry, so an edge replacement or a closure
//! walk sees a consistent sheet. Nothing here awaits.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use dashmap::DashMap;

use gridsync_engine::{Coordinate, EngineError};

use crate::storage::SheetId;

#[derive(Default, Debug, Clone)]
struct SheetGraph {
    precedents: HashMap<Coordinate, BTreeSet<Coordinate>>,
    dependents: HashMap<Coordinate, BTreeSet<Coordinate>>,
}

impl SheetGraph {
    fn replace(&mut self, dependent: Coordinate, sources: BTreeSet<Coordinate>) {
        if let Some(old) = self.precedents.remove(&dependent) {
            for source in old {
                if let Some(deps) = self.dependents.get_mut(&source) {
                    deps.remove(&dependent);
                    if deps.is_empty() {
                        self.dependents.remove(&source);
                    }
                }
            }
        }

        if sources.is_empty() {
            return;
        }
        for source in &sources {
            self.dependents.entry(*source).or_default().insert(dependent);
        }
        self.precedents.insert(dependent, sources);
    }

    fn edge_count(&self) -> usize {
        self.precedents.values().map(BTreeSet::len).sum()
    }
}

/// Dependency edges for every sheet the process has touched.
#[derive(Default, Debug)]
pub struct DependencyGraph {
    sheets: DashMap<SheetId, SheetGraph>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every edge into `dependent` with edges from `sources`.
    ///
    /// Idempotent. A cell listed among its own sources is rejected with
    /// [`EngineError::CircularReference`] and the graph is left unchanged.
    pub fn set_edges(
        &self,
        sheet: SheetId,
        dependent: Coordinate,
        sources: BTreeSet<Coordinate>,
    ) -> Result<(), EngineError> {
        if sources.contains(&dependent) {
            return Err(EngineError::CircularReference {
                origin: dependent,
                path: vec![dependent, dependent],
            });
        }
        self.sheets
            .entry(sheet)
            .or_default()
            .replace(dependent, sources);
        Ok(())
    }

    /// Drop every edge into `dependent` (its formula was removed).
    pub fn clear_edges(&self, sheet: SheetId, dependent: Coordinate) {
        if let Some(mut graph) = self.sheets.get_mut(&sheet) {
            graph.replace(dependent, BTreeSet::new());
        }
    }

    /// Direct dependents of `source`, in row-major order.
    pub fn dependents_of(&self, sheet: SheetId, source: Coordinate) -> Vec<Coordinate> {
        self.sheets
            .get(&sheet)
            .and_then(|g| g.dependents.get(&source).map(|d| d.iter().copied().collect()))
            .unwrap_or_default()
    }

    /// Cells `dependent`'s formula reads, in row-major order.
    pub fn precedents_of(&self, sheet: SheetId, dependent: Coordinate) -> Vec<Coordinate> {
        self.sheets
            .get(&sheet)
            .and_then(|g| g.precedents.get(&dependent).map(|p| p.iter().copied().collect()))
            .unwrap_or_default()
    }

    /// Every cell that transitively depends on `root`, breadth-first in
    /// discovery order, each exactly once, `root` itself excluded.
    ///
    /// Fails with [`EngineError::BudgetExceeded`] once more than `limit` cells
    /// have been discovered.
    pub fn transitive_dependents(
        &self,
        sheet: SheetId,
        root: Coordinate,
        limit: usize,
    ) -> Result<Vec<Coordinate>, EngineError> {
        let Some(graph) = self.sheets.get(&sheet) else {
            return Ok(Vec::new());
        };

        let mut order = Vec::new();
        let mut seen = HashSet::from([root]);
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            let Some(deps) = graph.dependents.get(&current) else {
                continue;
            };
            for dep in deps {
                if !seen.insert(*dep) {
                    continue;
                }
                if order.len() == limit {
                    return Err(EngineError::budget(format!(
                        "more than {limit} cells depend on {root}"
                    ))
                    .at(root));
                }
                order.push(*dep);
                queue.push_back(*dep);
            }
        }
        Ok(order)
    }

    /// Replace a sheet's edges wholesale, e.g. from stored formulas at startup.
    ///
    /// Self-referencing entries are skipped and returned so the caller can
    /// report them.
    pub fn rebuild_sheet(
        &self,
        sheet: SheetId,
        formulas: impl IntoIterator<Item = (Coordinate, BTreeSet<Coordinate>)>,
    ) -> Vec<Coordinate> {
        let mut graph = SheetGraph::default();
        let mut rejected = Vec::new();
        for (dependent, sources) in formulas {
            if sources.contains(&dependent) {
                rejected.push(dependent);
            } else {
                graph.replace(dependent, sources);
            }
        }
        self.sheets.insert(sheet, graph);
        rejected
    }

    pub fn remove_sheet(&self, sheet: SheetId) {
        self.sheets.remove(&sheet);
    }

    /// Total number of edges stored for `sheet`.
    pub fn edge_count(&self, sheet: SheetId) -> usize {
        self.sheets.get(&sheet).map(|g| g.edge_count()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridsync_engine::ErrorKind;
    use pretty_assertions::assert_eq;

    const SHEET: SheetId = SheetId(1);

    fn cell(name: &str) -> Coordinate {
        name.parse().unwrap()
    }

    fn set(names: &[&str]) -> BTreeSet<Coordinate> {
        names.iter().map(|n| cell(n)).collect()
    }

    #[test]
    fn test_set_edges_replaces_previous_edges() {
        let graph = DependencyGraph::new();
        graph.set_edges(SHEET, cell("C1"), set(&["A1", "B1"])).unwrap();
        graph.set_edges(SHEET, cell("C1"), set(&["B1", "B2"])).unwrap();

        assert!(graph.dependents_of(SHEET, cell("A1")).is_empty());
        assert_eq!(graph.dependents_of(SHEET, cell("B1")), vec![cell("C1")]);
        assert_eq!(graph.precedents_of(SHEET, cell("C1")), vec![cell("B1"), cell("B2")]);
        assert_eq!(graph.edge_count(SHEET), 2);
    }

    #[test]
    fn test_set_edges_is_idempotent() {
        let graph = DependencyGraph::new();
        graph.set_edges(SHEET, cell("B1"), set(&["A1"])).unwrap();
        graph.set_edges(SHEET, cell("B1"), set(&["A1"])).unwrap();
        assert_eq!(graph.dependents_of(SHEET, cell("A1")), vec![cell("B1")]);
        assert_eq!(graph.edge_count(SHEET), 1);
    }

    #[test]
    fn test_self_loop_is_rejected() {
        let graph = DependencyGraph::new();
        let err = graph
            .set_edges(SHEET, cell("A1"), set(&["A1", "B1"]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircularReference);
        assert_eq!(graph.edge_count(SHEET), 0);
    }

    #[test]
    fn test_clear_edges_leaves_no_empty_sets() {
        let graph = DependencyGraph::new();
        graph.set_edges(SHEET, cell("B1"), set(&["A1"])).unwrap();
        graph.clear_edges(SHEET, cell("B1"));
        assert!(graph.dependents_of(SHEET, cell("A1")).is_empty());
        assert!(graph.sheets.get(&SHEET).unwrap().dependents.is_empty());
    }

    #[test]
    fn test_transitive_dependents_breadth_first_once_each() {
        // A1 -> B1 -> C1, A1 -> B2 -> C1, C1 -> D1
        let graph = DependencyGraph::new();
        graph.set_edges(SHEET, cell("B1"), set(&["A1"])).unwrap();
        graph.set_edges(SHEET, cell("B2"), set(&["A1"])).unwrap();
        graph.set_edges(SHEET, cell("C1"), set(&["B1", "B2"])).unwrap();
        graph.set_edges(SHEET, cell("D1"), set(&["C1"])).unwrap();

        let closure = graph.transitive_dependents(SHEET, cell("A1"), 100).unwrap();
        assert_eq!(closure, vec![cell("B1"), cell("B2"), cell("C1"), cell("D1")]);
    }

    #[test]
    fn test_transitive_dependents_terminate_on_cycles() {
        let graph = DependencyGraph::new();
        graph.set_edges(SHEET, cell("B1"), set(&["A1"])).unwrap();
        graph.set_edges(SHEET, cell("C1"), set(&["B1"])).unwrap();
        graph.set_edges(SHEET, cell("A1"), set(&["C1"])).unwrap();

        let closure = graph.transitive_dependents(SHEET, cell("A1"), 100).unwrap();
        assert_eq!(closure, vec![cell("B1"), cell("C1")]);
    }

    #[test]
    fn test_transitive_dependents_respect_limit() {
        let graph = DependencyGraph::new();
        for row in 2..=5 {
            graph
                .set_edges(SHEET, Coordinate::new(row, 1), set(&["A1"]))
                .unwrap();
        }
        assert_eq!(graph.transitive_dependents(SHEET, cell("A1"), 4).unwrap().len(), 4);
        let err = graph.transitive_dependents(SHEET, cell("A1"), 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecalculationBudgetExceeded);
    }

    #[test]
    fn test_sheets_are_independent() {
        let graph = DependencyGraph::new();
        graph.set_edges(SheetId(1), cell("B1"), set(&["A1"])).unwrap();
        graph.set_edges(SheetId(2), cell("C1"), set(&["A1"])).unwrap();
        graph.remove_sheet(SheetId(1));

        assert!(graph.dependents_of(SheetId(1), cell("A1")).is_empty());
        assert_eq!(graph.dependents_of(SheetId(2), cell("A1")), vec![cell("C1")]);
    }

    #[test]
    fn test_rebuild_replaces_sheet_and_skips_self_loops() {
        let graph = DependencyGraph::new();
        graph.set_edges(SHEET, cell("Z9"), set(&["Z1"])).unwrap();

        let rejected = graph.rebuild_sheet(
            SHEET,
            vec![
                (cell("B1"), set(&["A1"])),
                (cell("C1"), set(&["C1"])),
            ],
        );

        assert_eq!(rejected, vec![cell("C1")]);
        assert!(graph.dependents_of(SHEET, cell("Z1")).is_empty());
        assert_eq!(graph.dependents_of(SHEET, cell("A1")), vec![cell("B1")]);
    }
}
