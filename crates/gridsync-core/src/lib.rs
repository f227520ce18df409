//! gridsync-core - dependency tracking, resolution and recalculation on write.

pub mod config;
pub mod error;
pub mod events;
pub mod recalc;
pub mod storage;

pub use config::RecalcConfig;
pub use error::{CoreError, Result, StoreError};
pub use events::{ChangeFeed, SheetChange};
pub use recalc::{CellReport, CellResult, DependencyGraph, Recalculator, Resolver};
pub use storage::{CellSnapshot, CellStore, CellStoreAdapter, MemoryStore, SheetId, StoredCell};

pub use gridsync_engine::{Coordinate, EngineError, ErrorKind};
