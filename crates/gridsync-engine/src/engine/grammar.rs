//! Reference grammar: formula text to an evaluable template.
//!
//! A formula is tokenized once. Cell references (`A1`, `$B$2`) and ranges used
//! as function arguments (`SUM(A1:B5)`) become substitution slots; everything
//! else is normalized into Rhai expression syntax:
//!
//! - numeric literals are rendered as floats, so `7/2` is `3.5`
//! - `^` becomes `**`, `=` becomes `==`, `<>` becomes `!=`
//! - function names are upper-cased to match the registered builtins
//! - the arguments of aggregates (`SUM`, `AVG`, ...) are collected into one
//!   array, so `SUM(A1, B1:B2)` becomes `SUM([a1, [b1, b2]])`
//!
//! Anything the grammar does not recognize is a [`EngineError::Parse`].

use std::collections::{BTreeSet, HashSet};

use super::coordinate::Coordinate;
use crate::builtins::is_aggregate;
use crate::error::{EngineError, Result};

/// Upper bound on the number of cells a single range may expand to.
pub const MAX_RANGE_CELLS: u64 = 10_000;

/// One piece of a parsed formula template.
#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    /// Expression text passed through to the evaluator unchanged.
    Text(String),
    /// A single cell, substituted by its numeric value.
    Reference(Coordinate),
    /// A rectangular range, substituted by an array of values.
    Range { start: Coordinate, end: Coordinate },
}

/// A formula split into a template and the cells it reads.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedFormula {
    segments: Vec<Segment>,
    references: Vec<Coordinate>,
}

impl ParsedFormula {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Distinct referenced cells in order of first appearance
    /// (ranges contribute every cell they cover).
    pub fn references(&self) -> &[Coordinate] {
        &self.references
    }

    pub fn reference_set(&self) -> BTreeSet<Coordinate> {
        self.references.iter().copied().collect()
    }

    pub fn is_constant(&self) -> bool {
        self.references.is_empty()
    }

    /// Render the template with each reference replaced by `value_of(cell)`.
    pub fn substitute<F>(&self, mut value_of: F) -> String
    where
        F: FnMut(Coordinate) -> f64,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Reference(cell) => out.push_str(&render_number(value_of(*cell))),
                Segment::Range { start, end } => {
                    out.push('[');
                    for (i, cell) in Coordinate::rectangle(*start, *end).enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        out.push_str(&render_number(value_of(cell)));
                    }
                    out.push(']');
                }
            }
        }
        out
    }
}

/// Strip surrounding whitespace and a leading `=` marker, if any.
pub fn strip_formula_marker(input: &str) -> &str {
    let trimmed = input.trim();
    trimmed.strip_prefix('=').unwrap_or(trimmed).trim()
}

/// Parse a formula into its template and references.
pub fn parse_formula(formula: &str) -> Result<ParsedFormula> {
    Lexer::new(strip_formula_marker(formula)).run()
}

/// Render a number as a Rhai float literal. Negative values are parenthesized
/// so they compose with unary operators.
pub fn render_number(n: f64) -> String {
    let mut text = format!("{}", n.abs());
    if !text.contains('.') && !text.contains("inf") && !text.contains("NaN") {
        text.push_str(".0");
    }
    if n.is_sign_negative() && n != 0.0 {
        format!("(-{})", text)
    } else {
        text
    }
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    text: String,
    segments: Vec<Segment>,
    references: Vec<Coordinate>,
    seen: HashSet<Coordinate>,
    parens: Vec<Paren>,
    has_operand: bool,
    /// Next token must start an operand (start, after `(`, `,` or an operator).
    expect_operand: bool,
    /// The previous token was a call's opening parenthesis.
    after_call_open: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Paren {
    Group,
    Call,
    /// Call whose arguments are collected into one array (`SUM(A1, B1:B3)`).
    Aggregate,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            text: String::new(),
            segments: Vec::new(),
            references: Vec::new(),
            seen: HashSet::new(),
            parens: Vec::new(),
            has_operand: false,
            expect_operand: true,
            after_call_open: false,
        }
    }

    fn run(mut self) -> Result<ParsedFormula> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
                if !self.text.ends_with(' ') {
                    self.text.push(' ');
                }
                continue;
            }

            let after_call_open = std::mem::take(&mut self.after_call_open);
            match c {
                '0'..='9' | '.' => {
                    self.operand_position()?;
                    self.number()?;
                }
                c if c.is_ascii_alphabetic() || c == '$' || c == '_' => {
                    self.operand_position()?;
                    self.word()?;
                }
                '(' => {
                    self.operand_position()?;
                    self.bump();
                    self.parens.push(Paren::Group);
                    self.text.push('(');
                }
                ')' => {
                    let Some(paren) = self.parens.pop() else {
                        return Err(self.error("unbalanced ')'"));
                    };
                    if self.expect_operand && !(after_call_open && paren != Paren::Group) {
                        return Err(self.error("expected an operand before ')'"));
                    }
                    self.bump();
                    self.text.push_str(if paren == Paren::Aggregate { "])" } else { ")" });
                    self.expect_operand = false;
                }
                ',' => {
                    if !matches!(self.parens.last(), Some(Paren::Call | Paren::Aggregate)) {
                        return Err(self.error("',' outside of a function call"));
                    }
                    self.operator_position(",")?;
                    self.bump();
                    self.text.push_str(", ");
                }
                '+' | '-' if self.expect_operand => {
                    self.bump();
                    if self.text.ends_with(['+', '-']) {
                        self.text.push(' ');
                    }
                    self.text.push(c);
                }
                '+' | '-' | '*' | '/' | '%' => {
                    self.operator_position(&c.to_string())?;
                    self.bump();
                    self.text.push(c);
                }
                '^' => {
                    self.operator_position("^")?;
                    self.bump();
                    self.text.push_str("**");
                }
                '=' => {
                    self.operator_position("=")?;
                    self.bump();
                    self.eat('=');
                    self.push_op("==");
                }
                '<' => {
                    self.operator_position("<")?;
                    self.bump();
                    let op = if self.eat('=') {
                        "<="
                    } else if self.eat('>') {
                        "!="
                    } else {
                        "<"
                    };
                    self.push_op(op);
                }
                '>' => {
                    self.operator_position(">")?;
                    self.bump();
                    let op = if self.eat('=') { ">=" } else { ">" };
                    self.push_op(op);
                }
                '!' if self.peek_at(1) == Some('=') => {
                    self.operator_position("!=")?;
                    self.pos += 2;
                    self.push_op("!=");
                }
                '!' => {
                    self.operand_position()?;
                    self.bump();
                    self.text.push('!');
                }
                '&' | '|' => {
                    self.operator_position(&c.to_string())?;
                    self.bump();
                    if !self.eat(c) {
                        return Err(self.error(&format!("expected '{c}{c}'")));
                    }
                    self.push_op(if c == '&' { "&&" } else { "||" });
                }
                '"' | '\'' => return Err(self.error("text literals are not supported")),
                other => return Err(self.error(&format!("unexpected character '{other}'"))),
            }
        }

        if !self.parens.is_empty() {
            return Err(EngineError::parse(format!(
                "unbalanced '(': {} left open",
                self.parens.len()
            )));
        }
        if !self.has_operand {
            return Err(EngineError::parse("empty formula"));
        }
        if self.expect_operand {
            return Err(EngineError::parse("formula ends with an operator"));
        }

        self.flush_text();
        Ok(ParsedFormula {
            segments: self.segments,
            references: self.references,
        })
    }

    /// An operand may start here: not directly after another operand.
    fn operand_position(&self) -> Result<()> {
        if self.expect_operand {
            Ok(())
        } else {
            Err(self.error("missing operator between operands"))
        }
    }

    /// A binary operator may appear here: only after a complete operand.
    /// The next token must then start an operand.
    fn operator_position(&mut self, op: &str) -> Result<()> {
        if self.expect_operand {
            return Err(self.error(&format!("'{op}' is missing an operand")));
        }
        self.expect_operand = true;
        Ok(())
    }

    fn number(&mut self) -> Result<()> {
        let start = self.pos;
        self.eat_while(|c| c.is_ascii_digit());
        if self.eat('.') {
            self.eat_while(|c| c.is_ascii_digit());
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let digit_at = match self.peek_at(1) {
                Some('+' | '-') => 2,
                _ => 1,
            };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                self.pos += digit_at;
                self.eat_while(|c| c.is_ascii_digit());
            }
        }

        let literal: String = self.chars[start..self.pos].iter().collect();
        if self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
        {
            return Err(self.error(&format!("invalid number literal '{literal}'")));
        }
        let value: f64 = literal
            .parse()
            .map_err(|_| self.error(&format!("invalid number literal '{literal}'")))?;
        if !value.is_finite() {
            return Err(self.error(&format!("number literal '{literal}' is out of range")));
        }

        self.text.push_str(&render_number(value));
        self.has_operand = true;
        self.expect_operand = false;
        Ok(())
    }

    fn word(&mut self) -> Result<()> {
        let start = self.pos;
        self.eat_while(|c| c.is_ascii_alphanumeric() || c == '$' || c == '_');
        let word: String = self.chars[start..self.pos].iter().collect();
        self.has_operand = true;

        if self.peek_past_whitespace() == Some('(') && !word.contains('$') {
            self.eat_while(char::is_whitespace);
            self.bump();
            let name = word.to_ascii_uppercase();
            let paren = if is_aggregate(&name) {
                Paren::Aggregate
            } else {
                Paren::Call
            };
            self.text.push_str(&name);
            self.text.push_str(if paren == Paren::Aggregate { "([" } else { "(" });
            self.parens.push(paren);
            self.after_call_open = true;
            return Ok(());
        }

        self.expect_operand = false;
        if word.eq_ignore_ascii_case("true") || word.eq_ignore_ascii_case("false") {
            self.text.push_str(&word.to_ascii_lowercase());
            return Ok(());
        }

        let Some(start_cell) = Coordinate::parse_a1(&word) else {
            return Err(EngineError::parse(format!(
                "unknown name or invalid reference '{word}' at position {}",
                start + 1
            )));
        };

        if self.peek_past_whitespace() != Some(':') {
            self.push_reference(start_cell);
            return Ok(());
        }

        self.eat_while(char::is_whitespace);
        self.bump();
        self.eat_while(char::is_whitespace);
        let end_start = self.pos;
        self.eat_while(|c| c.is_ascii_alphanumeric() || c == '$');
        let end_word: String = self.chars[end_start..self.pos].iter().collect();
        let Some(end_cell) = Coordinate::parse_a1(&end_word) else {
            return Err(EngineError::parse(format!(
                "invalid range end '{end_word}' at position {}",
                end_start + 1
            )));
        };

        if !matches!(self.parens.last(), Some(Paren::Call | Paren::Aggregate)) {
            return Err(EngineError::parse(format!(
                "range {word}:{end_word} must be a function argument"
            )));
        }
        if Coordinate::rectangle_len(start_cell, end_cell) > MAX_RANGE_CELLS {
            return Err(EngineError::parse(format!(
                "range {word}:{end_word} covers more than {MAX_RANGE_CELLS} cells"
            )));
        }

        self.flush_text();
        for cell in Coordinate::rectangle(start_cell, end_cell) {
            self.note_reference(cell);
        }
        self.segments.push(Segment::Range {
            start: start_cell,
            end: end_cell,
        });
        Ok(())
    }

    /// Binary operators are space-padded so they never fuse with a following
    /// unary sign into a reserved Rhai symbol (`<-`).
    fn push_op(&mut self, op: &str) {
        if !self.text.ends_with(' ') {
            self.text.push(' ');
        }
        self.text.push_str(op);
        self.text.push(' ');
    }

    fn push_reference(&mut self, cell: Coordinate) {
        self.flush_text();
        self.note_reference(cell);
        self.segments.push(Segment::Reference(cell));
    }

    fn note_reference(&mut self, cell: Coordinate) {
        if self.seen.insert(cell) {
            self.references.push(cell);
        }
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.segments
                .push(Segment::Text(std::mem::take(&mut self.text)));
        }
    }

    fn error(&self, message: &str) -> EngineError {
        EngineError::parse(format!("{message} at position {}", self.pos + 1))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn peek_past_whitespace(&self) -> Option<char> {
        self.chars[self.pos..]
            .iter()
            .copied()
            .find(|c| !c.is_whitespace())
    }

    fn bump(&mut self) {
        self.pos += 1;
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_while(&mut self, pred: impl Fn(char) -> bool) {
        while self.peek().is_some_and(&pred) {
            self.pos += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    fn cell(name: &str) -> Coordinate {
        Coordinate::parse_a1(name).unwrap()
    }

    fn parse_err(formula: &str) -> EngineError {
        parse_formula(formula).expect_err("formula should not parse")
    }

    #[test]
    fn test_constant_formula_has_no_references() {
        let parsed = parse_formula("2+3*4").unwrap();
        assert!(parsed.is_constant());
        assert_eq!(parsed.substitute(|_| 0.0), "2.0+3.0*4.0");
    }

    #[test]
    fn test_references_are_deduplicated_in_order() {
        let parsed = parse_formula("B1 + A1 * b1").unwrap();
        assert_eq!(parsed.references(), &[cell("B1"), cell("A1")]);
    }

    #[test]
    fn test_leading_marker_is_stripped() {
        let parsed = parse_formula("  =A1+10").unwrap();
        assert_eq!(parsed.references(), &[cell("A1")]);
    }

    #[test]
    fn test_substitution_uses_values() {
        let parsed = parse_formula("A1 + 10").unwrap();
        assert_eq!(parsed.substitute(|_| 5.0), "5.0 + 10.0");
        assert_eq!(parsed.substitute(|_| -2.5), "(-2.5) + 10.0");
    }

    #[test]
    fn test_operators_are_normalized() {
        let parsed = parse_formula("A1^2 <> 4 && a1 = 2").unwrap();
        assert_eq!(
            parsed.substitute(|_| 2.0),
            "2.0**2.0 != 4.0 && 2.0 == 2.0"
        );
    }

    #[test]
    fn test_range_expands_inside_call() {
        let parsed = parse_formula("sum(A1:B2)").unwrap();
        assert_eq!(
            parsed.references(),
            &[cell("A1"), cell("B1"), cell("A2"), cell("B2")]
        );
        let mut next = 0.0;
        let text = parsed.substitute(|_| {
            next += 1.0;
            next
        });
        assert_eq!(text, "SUM([[1.0, 2.0, 3.0, 4.0]])");
    }

    #[test]
    fn test_aggregate_arguments_become_one_array() {
        let parsed = parse_formula("SUM(A1, 2) + Max(A1:A2, -1) + COUNT()").unwrap();
        assert_eq!(
            parsed.substitute(|_| 1.0),
            "SUM([1.0, 2.0]) + MAX([[1.0, 1.0], -1.0]) + COUNT([])"
        );
        let parsed = parse_formula("IF(A1 > 1, 2, 3)").unwrap();
        assert_eq!(parsed.substitute(|_| 1.0), "IF(1.0 > 1.0, 2.0, 3.0)");
    }

    #[test]
    fn test_unary_signs_are_kept_apart() {
        let parsed = parse_formula("1 - -A1 + !true").unwrap();
        assert_eq!(parsed.substitute(|_| 2.0), "1.0 - -2.0 + !true");
        let parsed = parse_formula("1--A1").unwrap();
        assert_eq!(parsed.substitute(|_| 2.0), "1.0- -2.0");
    }

    #[test]
    fn test_function_names_are_not_references() {
        let parsed = parse_formula("LOG10(2)").unwrap();
        assert!(parsed.is_constant());
    }

    #[test]
    fn test_unbalanced_parentheses_are_parse_errors() {
        assert_eq!(parse_err("(1+2").kind(), ErrorKind::ParseError);
        assert_eq!(parse_err("1+2)").kind(), ErrorKind::ParseError);
        assert_eq!(parse_err("SUM(A1:A3").kind(), ErrorKind::ParseError);
    }

    #[test]
    fn test_invalid_tokens_are_parse_errors() {
        for bad in ["", "=", "1 # 2", "\"text\"", "A1 & B1", "foo + 1", "A0", "1.2.3", "2A1"] {
            assert_eq!(parse_err(bad).kind(), ErrorKind::ParseError, "{bad:?}");
        }
    }

    #[test]
    fn test_operator_operand_structure_is_checked() {
        for bad in [
            "1+", "A1 B1", "*2", "1+*2", "()+1", "(1)(2)", "1 SUM(A1)", "SUM(1,)", "SUM(,1)",
            "A1 <", "!", "2 ^", "= 1 = ",
        ] {
            assert_eq!(parse_err(bad).kind(), ErrorKind::ParseError, "{bad:?}");
        }
        for good in ["-1", "+A1", "!(A1 > 1)", "SUM()", "(((1)))", "A1 != -2", "2^-1"] {
            assert!(parse_formula(good).is_ok(), "{good:?} should parse");
        }
    }

    #[test]
    fn test_range_outside_call_is_rejected() {
        assert_eq!(parse_err("A1:B2 + 1").kind(), ErrorKind::ParseError);
    }

    #[test]
    fn test_oversized_range_is_rejected() {
        let err = parse_err("SUM(A1:A10001)");
        assert!(err.to_string().contains("more than"));
    }

    #[test]
    fn test_render_number_always_has_decimal_point() {
        assert_eq!(render_number(14.0), "14.0");
        assert_eq!(render_number(0.25), "0.25");
        assert_eq!(render_number(-0.0), "0.0");
        assert!(render_number(1e300).ends_with(".0"));
    }
}
