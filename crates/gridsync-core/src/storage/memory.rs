use std::collections::HashMap;
use std::future::{Future, ready};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;

use gridsync_engine::Coordinate;

use super::{CellSnapshot, CellStore, SheetId};
use crate::error::StoreError;

/// A cell record as the persistence layer keeps it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoredCell {
    pub content: Option<String>,
    pub formula: Option<String>,
    /// Opaque to the engine; carried through saves untouched.
    pub hyperlink: Option<String>,
}

impl StoredCell {
    fn is_blank(&self) -> bool {
        self.content.is_none() && self.formula.is_none() && self.hyperlink.is_none()
    }

    fn snapshot(&self) -> CellSnapshot {
        CellSnapshot {
            content: self.content.clone(),
            formula: self.formula.clone(),
        }
    }
}

/// In-process [`CellStore`].
///
/// Clones share the same cells. Every `get_cell`/`get_cells` call counts as one
/// fetch, which lets tests observe batching.
#[derive(Clone, Default)]
pub struct MemoryStore {
    cells: Arc<DashMap<(SheetId, Coordinate), StoredCell>>,
    fetches: Arc<AtomicUsize>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw record, bypassing recalculation.
    pub fn insert(
        &self,
        sheet: SheetId,
        at: Coordinate,
        content: Option<&str>,
        formula: Option<&str>,
    ) {
        self.insert_cell(
            sheet,
            at,
            StoredCell {
                content: content.map(str::to_string),
                formula: formula.map(str::to_string),
                hyperlink: None,
            },
        );
    }

    pub fn insert_cell(&self, sheet: SheetId, at: Coordinate, cell: StoredCell) {
        if cell.is_blank() {
            self.cells.remove(&(sheet, at));
        } else {
            self.cells.insert((sheet, at), cell);
        }
    }

    pub fn cell(&self, sheet: SheetId, at: Coordinate) -> Option<StoredCell> {
        self.cells.get(&(sheet, at)).map(|c| c.clone())
    }

    pub fn content(&self, sheet: SheetId, at: Coordinate) -> Option<String> {
        self.cells.get(&(sheet, at)).and_then(|c| c.content.clone())
    }

    /// Number of non-blank cells across all sheets.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Number of read calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Make every operation fail with [`StoreError::Backend`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(StoreError::Backend("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    fn update(&self, sheet: SheetId, at: Coordinate, apply: impl FnOnce(&mut StoredCell)) {
        let mut cell = self.cell(sheet, at).unwrap_or_default();
        apply(&mut cell);
        self.insert_cell(sheet, at, cell);
    }
}

impl CellStore for MemoryStore {
    fn get_cell(
        &self,
        sheet: SheetId,
        at: Coordinate,
    ) -> impl Future<Output = Result<Option<CellSnapshot>, StoreError>> + Send {
        let result = self.check_available().map(|()| {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            self.cells.get(&(sheet, at)).map(|c| c.snapshot())
        });
        ready(result)
    }

    fn get_cells(
        &self,
        sheet: SheetId,
        at: &[Coordinate],
    ) -> impl Future<Output = Result<HashMap<Coordinate, CellSnapshot>, StoreError>> + Send {
        let result = self.check_available().map(|()| {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            at.iter()
                .filter_map(|coord| {
                    self.cells
                        .get(&(sheet, *coord))
                        .map(|c| (*coord, c.snapshot()))
                })
                .collect()
        });
        ready(result)
    }

    fn save_cell(
        &self,
        sheet: SheetId,
        at: Coordinate,
        content: Option<String>,
        formula: Option<String>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        let result = self.check_available().map(|()| {
            self.update(sheet, at, |cell| {
                cell.content = content;
                cell.formula = formula;
            })
        });
        ready(result)
    }

    fn save_content(
        &self,
        sheet: SheetId,
        at: Coordinate,
        content: Option<String>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        let result = self
            .check_available()
            .map(|()| self.update(sheet, at, |cell| cell.content = content));
        ready(result)
    }

    fn formula_cells(
        &self,
        sheet: SheetId,
    ) -> impl Future<Output = Result<Vec<(Coordinate, String)>, StoreError>> + Send {
        let result = self.check_available().map(|()| {
            let mut cells: Vec<(Coordinate, String)> = self
                .cells
                .iter()
                .filter(|entry| entry.key().0 == sheet)
                .filter_map(|entry| {
                    let formula = entry.value().snapshot().formula()?.to_string();
                    Some((entry.key().1, formula))
                })
                .collect();
            cells.sort();
            cells
        });
        ready(result)
    }
}
