//! The cell metadata table: base load, dropdown filters, display view.

use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

use crate::config::{ColumnConfig, Config};
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::query::{QueryClient, QueryParams};
use crate::schema::humanize;
use crate::table::Table;

/// Options for one dropdown filter. The first option is always `""`,
/// meaning no filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterOptions {
    pub column: String,
    pub label: String,
    pub options: Vec<String>,
}

/// Selected dropdown values by column. Empty values are inactive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterValues(pub BTreeMap<String, String>);

impl FilterValues {
    pub fn set(&mut self, column: &str, value: &str) {
        if value.is_empty() {
            self.0.remove(column);
        } else {
            self.0.insert(column.to_string(), value.to_string());
        }
    }

    pub fn is_active(&self) -> bool {
        self.0.values().any(|v| !v.is_empty())
    }
}

/// Keep only cells with more than `min_regular_cycles` regular cycles.
/// Tables without the column pass through unchanged.
pub fn apply_cycle_threshold(table: Table, cols: &ColumnConfig, min_regular_cycles: f64) -> Table {
    if table.is_empty() || !table.has_column(&cols.regular_cycles) {
        return table;
    }
    table.filter(|row| {
        row.number(&cols.regular_cycles)
            .map(|n| n > min_regular_cycles)
            .unwrap_or(false)
    })
}

/// Fetch the cell list and apply the regular-cycle threshold.
pub async fn load_base_table(client: &QueryClient, cfg: &Config) -> Table {
    let raw = client.fetch(&cfg.cell_query_id, &QueryParams::new()).await;
    let fetched = raw.height();
    let table = apply_cycle_threshold(raw, &cfg.columns, cfg.min_regular_cycles);
    log(
        Level::Info,
        Domain::Metadata,
        "base_table_loaded",
        obj(&[
            ("query_id", v_str(&cfg.cell_query_id)),
            ("fetched", json!(fetched)),
            ("kept", json!(table.height())),
        ]),
    );
    table
}

/// Dropdown options for each candidate column present in `table`.
pub fn build_filters(table: &Table, columns: &[String]) -> Vec<FilterOptions> {
    columns
        .iter()
        .filter(|c| table.has_column(c))
        .map(|c| {
            let mut options = vec![String::new()];
            options.extend(table.unique_text(c));
            FilterOptions {
                column: c.clone(),
                label: humanize(c),
                options,
            }
        })
        .collect()
}

/// Exact match on every active filter. Values are compared as text so a
/// numeric column matches its stringified option.
pub fn apply_filters(table: &Table, filters: &FilterValues) -> Table {
    let active: Vec<(&String, &String)> = filters
        .0
        .iter()
        .filter(|(c, v)| !v.is_empty() && table.has_column(c))
        .collect();
    if active.is_empty() {
        return table.clone();
    }
    table.filter(|row| {
        active.iter().all(|(c, v)| {
            row.text(c)
                .map(|text| text == **v)
                .unwrap_or(false)
        })
    })
}

/// Columns to show: the id column first, then the requested ones that
/// exist.
pub fn display_columns(table: &Table, cols: &ColumnConfig, requested: &[String]) -> Vec<String> {
    let mut out = vec![cols.id.clone()];
    out.extend(
        requested
            .iter()
            .filter(|c| **c != cols.id && table.has_column(c))
            .cloned(),
    );
    out
}

pub fn default_display_columns(table: &Table, cols: &ColumnConfig) -> Vec<String> {
    display_columns(table, cols, &cols.default_display)
}

pub fn display_view(filtered: &Table, display: &[String]) -> Table {
    filtered.select(display)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn cells() -> Table {
        Table::from_json_rows(&[
            json!({"cell_id": 1, "cell_name": "c1", "design_name": "A", "test_year": 2023, "regular_cycles": 25}),
            json!({"cell_id": 2, "cell_name": "c2", "design_name": "B", "test_year": 2024, "regular_cycles": 15}),
            json!({"cell_id": 3, "cell_name": "c3", "design_name": null, "test_year": 2023, "regular_cycles": 21}),
        ])
    }

    #[test]
    fn test_threshold_is_strict() {
        let cols = ColumnConfig::default();
        let t = apply_cycle_threshold(cells(), &cols, 20.0);
        assert_eq!(t.unique_text("cell_id"), vec!["1", "3"]);
        let t = apply_cycle_threshold(cells(), &cols, 21.0);
        assert_eq!(t.unique_text("cell_id"), vec!["1"]);
    }

    #[test]
    fn test_threshold_skipped_without_column() {
        let t = Table::from_json_rows(&[json!({"cell_id": 1})]);
        let out = apply_cycle_threshold(t.clone(), &ColumnConfig::default(), 20.0);
        assert_eq!(out, t);
    }

    #[test]
    fn test_build_filters_skips_missing_columns() {
        let cols = ColumnConfig::default();
        let filters = build_filters(&cells(), &cols.filter_columns);
        let names: Vec<&str> = filters.iter().map(|f| f.column.as_str()).collect();
        assert_eq!(names, vec!["design_name", "test_year"]);
        assert_eq!(filters[0].options, vec!["", "A", "B"]);
        assert_eq!(filters[0].label, "Design Name");
        assert_eq!(filters[1].options, vec!["", "2023", "2024"]);
    }

    #[test]
    fn test_apply_filters_and_across_columns() {
        let mut f = FilterValues::default();
        f.set("test_year", "2023");
        assert_eq!(apply_filters(&cells(), &f).height(), 2);
        f.set("design_name", "A");
        let out = apply_filters(&cells(), &f);
        assert_eq!(out.height(), 1);
        assert_eq!(out.value(0, "cell_id"), Some(json!(1)));
        f.set("design_name", "");
        assert_eq!(apply_filters(&cells(), &f).height(), 2);
    }

    #[test]
    fn test_display_columns_id_first() {
        let cols = ColumnConfig::default();
        let display = default_display_columns(&cells(), &cols);
        assert_eq!(display, vec!["cell_id", "cell_name", "regular_cycles"]);
        let view = display_view(&cells(), &display);
        assert_eq!(view.width(), 3);
        assert_eq!(view.value(2, "cell_name"), Some(Value::String("c3".into())));
    }
}
