//! Formula resolution and recalculation.

mod context;
pub mod graph;
pub mod resolver;
pub mod scheduler;

pub use graph::DependencyGraph;
pub use resolver::Resolver;
pub use scheduler::{CellReport, CellResult, Recalculator};
