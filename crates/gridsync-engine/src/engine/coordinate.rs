//! Cell coordinates and A1 notation.
//!
//! Provides bidirectional conversion between spreadsheet-style cell references
//! (e.g., "A1", "B2", "AA100") and 1-based row/column coordinates. This is the
//! only reference notation the engine understands; `$` absolute markers are
//! accepted and ignored.
//!
//! # Examples
//!
//! ```
//! use gridsync_engine::Coordinate;
//!
//! let cell: Coordinate = "B3".parse().unwrap();
//! assert_eq!(cell.col, 2);
//! assert_eq!(cell.row, 3);
//! assert_eq!(cell.to_string(), "B3");
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Largest addressable column (`XFD`).
pub const MAX_COLUMN: u32 = 16_384;
/// Largest addressable row.
pub const MAX_ROW: u32 = 1_048_576;

/// Position of a cell within a sheet. Both components are 1-based.
///
/// Ordering is row-major, which keeps dependency sets and range expansion
/// deterministic.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Coordinate {
    pub row: u32,
    pub col: u32,
}

impl Coordinate {
    /// Build a coordinate without bounds checking.
    pub const fn new(row: u32, col: u32) -> Coordinate {
        Coordinate { row, col }
    }

    /// Build a coordinate, returning `None` when either component is outside
    /// `1..=MAX_ROW` / `1..=MAX_COLUMN`.
    pub fn checked(row: u32, col: u32) -> Option<Coordinate> {
        if (1..=MAX_ROW).contains(&row) && (1..=MAX_COLUMN).contains(&col) {
            Some(Coordinate { row, col })
        } else {
            None
        }
    }

    /// Parse a reference in A1 notation (e.g., "A1", "b2", "$AA$10").
    /// Returns None if the input is not a reference or is out of bounds.
    pub fn parse_a1(name: &str) -> Option<Coordinate> {
        let caps = a1_re().captures(name)?;
        let letters = &caps["letters"];
        let numbers = &caps["numbers"];

        let mut col = 0u32;
        for c in letters.to_ascii_uppercase().bytes() {
            let digit = u32::from(c - b'A') + 1;
            col = col.checked_mul(26)?.checked_add(digit)?;
        }
        let row = numbers.parse::<u32>().ok()?;

        Coordinate::checked(row, col)
    }

    /// Convert a 1-based column index to letters (1 -> A, 26 -> Z, 27 -> AA).
    pub fn col_to_letters(col: u32) -> String {
        let mut result = String::new();
        let mut n = col;
        while n > 0 {
            n -= 1;
            result.insert(0, (b'A' + (n % 26) as u8) as char);
            n /= 26;
        }
        result
    }

    /// Every coordinate in the rectangle spanned by `a` and `b`, row-major.
    pub fn rectangle(a: Coordinate, b: Coordinate) -> impl Iterator<Item = Coordinate> {
        let (top, bottom) = (a.row.min(b.row), a.row.max(b.row));
        let (left, right) = (a.col.min(b.col), a.col.max(b.col));
        (top..=bottom).flat_map(move |row| (left..=right).map(move |col| Coordinate { row, col }))
    }

    /// Number of cells in the rectangle spanned by `a` and `b`.
    pub fn rectangle_len(a: Coordinate, b: Coordinate) -> u64 {
        let rows = u64::from(a.row.abs_diff(b.row)) + 1;
        let cols = u64::from(a.col.abs_diff(b.col)) + 1;
        rows * cols
    }
}

fn a1_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\$?(?<letters>[A-Za-z]{1,3})\$?(?<numbers>[0-9]{1,7})$")
            .expect("A1 reference regex must compile")
    })
}

impl std::str::FromStr for Coordinate {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_a1(s.trim()).ok_or_else(|| format!("Invalid cell reference: {}", s))
    }
}

impl TryFrom<String> for Coordinate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Coordinate> for String {
    fn from(value: Coordinate) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Coordinate::col_to_letters(self.col), self.row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_letter_columns() {
        assert_eq!(Coordinate::parse_a1("A1"), Some(Coordinate::new(1, 1)));
        assert_eq!(Coordinate::parse_a1("B1"), Some(Coordinate::new(1, 2)));
        assert_eq!(Coordinate::parse_a1("Z9"), Some(Coordinate::new(9, 26)));
    }

    #[test]
    fn test_parse_multi_letter_columns() {
        assert_eq!(Coordinate::parse_a1("AA1").unwrap().col, 27);
        assert_eq!(Coordinate::parse_a1("AZ1").unwrap().col, 52);
        assert_eq!(Coordinate::parse_a1("BA1").unwrap().col, 53);
        assert_eq!(Coordinate::parse_a1("XFD1").unwrap().col, MAX_COLUMN);
    }

    #[test]
    fn test_parse_absolute_markers_and_case() {
        assert_eq!(Coordinate::parse_a1("$b$2"), Some(Coordinate::new(2, 2)));
        assert_eq!(Coordinate::parse_a1("b$2"), Some(Coordinate::new(2, 2)));
    }

    #[test]
    fn test_parse_rejects_invalid_and_out_of_bounds() {
        for bad in ["", "123", "ABC", "A0", "1A", "A 1", "XFE1", "A1048577", "ABCD1"] {
            assert!(Coordinate::parse_a1(bad).is_none(), "{bad} should not parse");
        }
    }

    #[test]
    fn test_display_round_trips() {
        for name in ["A1", "Z26", "AA27", "XFD1048576"] {
            let coord: Coordinate = name.parse().unwrap();
            assert_eq!(coord.to_string(), name);
        }
    }

    #[test]
    fn test_rectangle_is_row_major_and_normalized() {
        let cells: Vec<String> = Coordinate::rectangle(
            Coordinate::parse_a1("B2").unwrap(),
            Coordinate::parse_a1("A1").unwrap(),
        )
        .map(|c| c.to_string())
        .collect();
        assert_eq!(cells, vec!["A1", "B1", "A2", "B2"]);
        assert_eq!(
            Coordinate::rectangle_len(Coordinate::new(1, 1), Coordinate::new(3, 2)),
            6
        );
    }
}
