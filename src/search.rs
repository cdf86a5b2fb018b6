//! Search over the cell table.
//!
//! A query mixes `column:value` tokens with free text:
//!
//! - `design_name:a` keeps rows whose column contains `a` (case-insensitive)
//! - `regular_cycles:>=100` compares numerically (`>=`, `<=`, `>`, `<`, `=`)
//! - `test_status:=active` falls back to containment when not a number
//! - whatever remains after removing the tokens must appear in some column
//!
//! Tokens AND together; the free text ORs across columns. Problems with a
//! token become warnings and that token is skipped.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::table::{RowRef, Table};

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\w+):\s*([\w.%<>=\-]+)").expect("valid token pattern"))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum CompareOp {
    Ge,
    Le,
    Gt,
    Lt,
    Eq,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Condition {
    Compare(CompareOp, f64),
    Contains(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnTerm {
    pub column: String,
    pub condition: Condition,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedSearch {
    /// Column tokens as written (column names lowercased)
    pub raw_terms: Vec<(String, String)>,
    pub free_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub table: Table,
    pub warnings: Vec<String>,
    /// `Found N of M cells ...`, set when any clause applied
    pub info: Option<String>,
}

/// Split a query into column tokens and leftover free text. Everything is
/// lowercased; matching is case-insensitive.
pub fn parse_search(query: &str) -> ParsedSearch {
    let lowered = query.trim().to_lowercase();
    let raw_terms: Vec<(String, String)> = token_re()
        .captures_iter(&lowered)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect();
    let stripped = token_re().replace_all(&lowered, " ");
    let free_text = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    ParsedSearch {
        raw_terms,
        free_text,
    }
}

/// Interpret a token value. `Err` carries the warning text.
fn parse_condition(value: &str) -> Result<Condition, String> {
    let ops: [(&str, CompareOp); 5] = [
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
        ("=", CompareOp::Eq),
    ];
    for (prefix, op) in ops {
        if let Some(rest) = value.strip_prefix(prefix) {
            let rest = rest.trim();
            return match rest.parse::<f64>() {
                Ok(n) => Ok(Condition::Compare(op, n)),
                Err(_) if op == CompareOp::Eq => Ok(Condition::Contains(rest.to_string())),
                Err(_) => Err(format!("Invalid numeric value in '{}'", value)),
            };
        }
    }
    Ok(Condition::Contains(value.to_string()))
}

fn cell_text(row: &RowRef<'_>, column: &str) -> Option<String> {
    row.text(column).map(|s| s.to_lowercase())
}

impl ColumnTerm {
    pub fn matches(&self, row: &RowRef<'_>) -> bool {
        match &self.condition {
            Condition::Contains(needle) => cell_text(row, &self.column)
                .map(|t| t.contains(needle.as_str()))
                .unwrap_or(false),
            Condition::Compare(op, rhs) => {
                let Some(lhs) = row.number(&self.column) else {
                    return false;
                };
                match op {
                    CompareOp::Ge => lhs >= *rhs,
                    CompareOp::Le => lhs <= *rhs,
                    CompareOp::Gt => lhs > *rhs,
                    CompareOp::Lt => lhs < *rhs,
                    CompareOp::Eq => lhs == *rhs,
                }
            }
        }
    }
}

/// Resolve tokens against the table's columns. Unknown columns and bad
/// numbers produce warnings.
pub fn resolve_terms(parsed: &ParsedSearch, table: &Table) -> (Vec<ColumnTerm>, Vec<String>) {
    let mut terms = Vec::new();
    let mut warnings = Vec::new();
    for (name, value) in &parsed.raw_terms {
        let Some(actual) = table.columns().into_iter().find(|c| c.to_lowercase() == *name) else {
            warnings.push(format!("Column '{}' not found", name));
            continue;
        };
        match parse_condition(value) {
            Ok(condition) => terms.push(ColumnTerm {
                column: actual,
                condition,
            }),
            Err(w) => warnings.push(w),
        }
    }
    (terms, warnings)
}

pub fn apply_search(table: &Table, query: &str) -> SearchOutcome {
    if query.trim().is_empty() {
        return SearchOutcome {
            table: table.clone(),
            warnings: Vec::new(),
            info: None,
        };
    }
    let parsed = parse_search(query);
    let (terms, warnings) = resolve_terms(&parsed, table);
    let free = parsed.free_text.as_str();
    let applied = !terms.is_empty() || !free.is_empty();

    let columns = table.columns();
    let filtered = table.filter(|row| {
        terms.iter().all(|t| t.matches(&row))
            && (free.is_empty()
                || columns
                    .iter()
                    .any(|c| cell_text(&row, c).map(|t| t.contains(free)).unwrap_or(false)))
    });

    let info = applied.then(|| {
        format!(
            "Found {} of {} cells matching search criteria",
            filtered.height(),
            table.height()
        )
    });
    SearchOutcome {
        table: filtered,
        warnings,
        info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cells() -> Table {
        Table::from_json_rows(&[
            json!({"cell_id": 1, "design_name": "A", "notes": "Cycling test", "regular_cycles": 120, "retention": 0.95}),
            json!({"cell_id": 2, "design_name": "A", "notes": "storage", "regular_cycles": 40, "retention": 0.80}),
            json!({"cell_id": 3, "design_name": "B", "notes": "formation", "regular_cycles": 300, "retention": 0.70}),
            json!({"cell_id": 4, "design_name": "B", "notes": "cycling test", "regular_cycles": 25, "retention": null}),
        ])
    }

    fn ids(t: &Table) -> Vec<String> {
        t.unique_text("cell_id")
    }

    #[test]
    fn test_parse_strips_tokens() {
        let p = parse_search("design_name:A   cycling  Test");
        assert_eq!(p.raw_terms, vec![("design_name".to_string(), "a".to_string())]);
        assert_eq!(p.free_text, "cycling test");
    }

    #[test]
    fn test_column_token_and_free_text() {
        let out = apply_search(&cells(), "design_name:A cycling");
        assert_eq!(ids(&out.table), vec!["1"]);
        assert!(out.warnings.is_empty());
        assert_eq!(out.info.as_deref(), Some("Found 1 of 4 cells matching search criteria"));
    }

    #[test]
    fn test_free_text_ors_across_columns() {
        let out = apply_search(&cells(), "cycling");
        assert_eq!(ids(&out.table), vec!["1", "4"]);
        let out = apply_search(&cells(), "formation");
        assert_eq!(ids(&out.table), vec!["3"]);
    }

    #[test]
    fn test_numeric_comparisons() {
        assert_eq!(ids(&apply_search(&cells(), "regular_cycles:>=120").table), vec!["1", "3"]);
        assert_eq!(ids(&apply_search(&cells(), "regular_cycles:>120").table), vec!["3"]);
        assert_eq!(ids(&apply_search(&cells(), "regular_cycles:<40").table), vec!["4"]);
        assert_eq!(ids(&apply_search(&cells(), "regular_cycles:<=40").table), vec!["2", "4"]);
        assert_eq!(ids(&apply_search(&cells(), "retention:=0.8").table), vec!["2"]);
    }

    #[test]
    fn test_tokens_and_together() {
        let out = apply_search(&cells(), "design_name:b regular_cycles:<100");
        assert_eq!(ids(&out.table), vec!["4"]);
    }

    #[test]
    fn test_unknown_column_warns_and_rest_applies() {
        let out = apply_search(&cells(), "colour:red design_name:b");
        assert_eq!(ids(&out.table), vec!["3", "4"]);
        assert_eq!(out.warnings, vec!["Column 'colour' not found"]);
    }

    #[test]
    fn test_non_numeric_comparison_warns() {
        let out = apply_search(&cells(), "regular_cycles:>lots");
        assert_eq!(out.table.height(), 4);
        assert_eq!(out.warnings, vec!["Invalid numeric value in '>lots'"]);
    }

    #[test]
    fn test_equals_non_numeric_falls_back_to_contains() {
        let out = apply_search(&cells(), "notes:=storage");
        assert_eq!(ids(&out.table), vec!["2"]);
    }

    #[test]
    fn test_column_name_case_insensitive() {
        let table = Table::from_json_rows(&[json!({"Design_Name": "A"}), json!({"Design_Name": "B"})]);
        let out = apply_search(&table, "design_name:a");
        assert_eq!(out.table.height(), 1);
    }

    #[test]
    fn test_empty_query_is_identity() {
        let out = apply_search(&cells(), "   ");
        assert_eq!(out.table.height(), 4);
        assert!(out.info.is_none());
    }
}
