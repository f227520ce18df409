//! Persistence collaborator interface and the pieces built on it.
//!
//! The core never owns cell records. It reads them through a [`CellStore`]
//! (normally backed by the product's database) and writes back formula text and
//! derived values. [`MemoryStore`] is the in-process implementation used by the
//! command-line front end and the tests.

mod adapter;
pub mod grd;
mod memory;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use gridsync_engine::Coordinate;

use crate::error::StoreError;

pub use adapter::CellStoreAdapter;
pub use memory::{MemoryStore, StoredCell};

/// Identifier of a sheet, as assigned by the persistence layer.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SheetId(pub i64);

impl fmt::Display for SheetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sheet {}", self.0)
    }
}

impl From<i64> for SheetId {
    fn from(id: i64) -> Self {
        SheetId(id)
    }
}

/// What the engine needs to know about one stored cell.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CellSnapshot {
    pub content: Option<String>,
    pub formula: Option<String>,
}

impl CellSnapshot {
    /// The formula text, treating an empty or blank formula as none.
    pub fn formula(&self) -> Option<&str> {
        self.formula
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }
}

/// Cell persistence as seen by the recalculation core.
///
/// Every method may suspend; nothing else in the core does.
pub trait CellStore: Send + Sync + 'static {
    fn get_cell(
        &self,
        sheet: SheetId,
        at: Coordinate,
    ) -> impl Future<Output = Result<Option<CellSnapshot>, StoreError>> + Send;

    /// Fetch several cells in one round trip. Absent cells are simply missing
    /// from the returned map.
    fn get_cells(
        &self,
        sheet: SheetId,
        at: &[Coordinate],
    ) -> impl Future<Output = Result<HashMap<Coordinate, CellSnapshot>, StoreError>> + Send;

    /// Store both content and formula of a cell.
    fn save_cell(
        &self,
        sheet: SheetId,
        at: Coordinate,
        content: Option<String>,
        formula: Option<String>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Store a derived value, leaving the formula untouched.
    fn save_content(
        &self,
        sheet: SheetId,
        at: Coordinate,
        content: Option<String>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Every cell of the sheet that currently holds a formula.
    fn formula_cells(
        &self,
        sheet: SheetId,
    ) -> impl Future<Output = Result<Vec<(Coordinate, String)>, StoreError>> + Send;
}
