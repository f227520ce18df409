//! Number formatting for stored content and number parsing for cell content.

/// Format a computed value for storage/display.
///
/// Uses the shortest decimal text that parses back to the same `f64`, so
/// stored content never loses precision. Whole numbers print without a
/// fractional part and negative zero prints as `0`.
pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        "0".to_string()
    } else if n.is_nan() {
        "#NAN!".to_string()
    } else if n.is_infinite() {
        "#INF!".to_string()
    } else {
        format!("{}", n)
    }
}

/// Numeric value of a plain (non-formula) cell's content.
///
/// Missing, blank, non-numeric and non-finite content all count as zero.
pub fn parse_numeric(content: Option<&str>) -> f64 {
    content
        .map(str::trim)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|n| n.is_finite())
        .unwrap_or(0.0)
}
