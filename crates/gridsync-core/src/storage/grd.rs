//! Seed format for sheets: one `CELL: VALUE` entry per line.
//!
//! ```text
//! # comments and blank lines are ignored
//! A1: 5
//! B1: =A1+10
//! C1: "label"
//! ```
//!
//! Formulas are stored without derived content; run a recalculation (or just
//! read them through the resolver) to get values.

use gridsync_engine::Coordinate;

use super::{MemoryStore, SheetId, StoredCell};
use crate::error::StoreError;

/// Parse seed text into cell records, in file order.
pub fn parse_grd_content(content: &str) -> Result<Vec<(Coordinate, StoredCell)>, StoreError> {
    let mut cells = Vec::new();

    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((cell_str, value_str)) = line.split_once(':') else {
            return Err(StoreError::Seed {
                line: line_num + 1,
                message: "Expected 'CELL: VALUE' format".to_string(),
            });
        };

        let cell_str = cell_str.trim();
        let at = Coordinate::parse_a1(cell_str).ok_or_else(|| StoreError::Seed {
            line: line_num + 1,
            message: format!("Invalid cell reference: {}", cell_str),
        })?;

        cells.push((at, parse_cell_value(value_str, line_num + 1)?));
    }

    Ok(cells)
}

/// Load seed text into `sheet`, returning the number of cells written.
pub fn seed(store: &MemoryStore, sheet: SheetId, content: &str) -> Result<usize, StoreError> {
    let cells = parse_grd_content(content)?;
    let count = cells.len();
    for (at, cell) in cells {
        store.insert_cell(sheet, at, cell);
    }
    Ok(count)
}

fn parse_cell_value(value: &str, line_num: usize) -> Result<StoredCell, StoreError> {
    let value = value.trim();

    if value.is_empty() {
        return Ok(StoredCell::default());
    }

    if let Some(formula) = value.strip_prefix('=') {
        return Ok(StoredCell {
            formula: Some(formula.trim().to_string()),
            ..StoredCell::default()
        });
    }

    if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        let text = unescape_grd_text(&value[1..value.len() - 1]);
        return Ok(StoredCell {
            content: Some(text),
            ..StoredCell::default()
        });
    }

    if value.parse::<f64>().is_ok() {
        return Ok(StoredCell {
            content: Some(value.to_string()),
            ..StoredCell::default()
        });
    }

    Err(StoreError::Seed {
        line: line_num,
        message: format!("Invalid value: {}. Use quotes for text.", value),
    })
}

fn unescape_grd_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some(next @ ('\\' | '"')) => out.push(next),
            Some(next) => {
                out.push('\\');
                out.push(next);
            }
            None => out.push('\\'),
        }
    }
    out
}
