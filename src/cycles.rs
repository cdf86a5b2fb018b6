//! Cycle data aggregation.
//!
//! One query per selected cell, strictly in selection order. Each cell's
//! rows are normalized on their own before the cells are stacked, because
//! the reference values (first regular cycle, 95th percentile) are per
//! cell. Metadata columns are then joined in and per-gram values derived
//! from the active mass.

use polars::prelude::{ChunkQuantile, Float64Chunked, NewChunkedArray, QuantileInterpolOptions};
use serde_json::json;

use crate::config::{ColumnConfig, Config};
use crate::logging::{log, obj, v_str, Domain, Level, ProfileScope};
use crate::query::{QueryClient, QueryParams};
use crate::schema::{
    is_derived, NORM_P95_SUFFIX, NORM_REG_SUFFIX, SPECIFIC_CAPACITY_SUFFIX, SPECIFIC_ENERGY_SUFFIX,
};
use crate::table::{EntityId, Table};

pub struct CycleAggregator {
    client: QueryClient,
    query_id: String,
    columns: ColumnConfig,
}

impl CycleAggregator {
    pub fn new(client: QueryClient, query_id: &str, columns: ColumnConfig) -> Self {
        Self {
            client,
            query_id: query_id.to_string(),
            columns,
        }
    }

    pub fn from_config(client: QueryClient, cfg: &Config) -> Self {
        Self::new(client, &cfg.cycle_query_id, cfg.columns.clone())
    }

    /// Fetch, normalize, stack and enrich cycle data for `ids`. Cells whose
    /// fetch comes back empty are left out. Never fails; no data is an
    /// empty table.
    pub async fn get_cycle_data(&self, ids: &[EntityId], metadata: Option<&Table>) -> Table {
        if ids.is_empty() {
            return Table::empty();
        }
        let _scope = ProfileScope::with_context("cycles.aggregate", &[("cells", json!(ids.len()))]);

        let mut per_cell = Vec::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            let params = QueryParams::new().with(&self.columns.cycle_param, id.as_str());
            let data = self.client.fetch(&self.query_id, &params).await;
            log(
                Level::Debug,
                Domain::Aggregate,
                "cell_fetched",
                obj(&[
                    ("cell", v_str(id.as_str())),
                    ("rows", json!(data.height())),
                    ("progress", json!(format!("{}/{}", i + 1, ids.len()))),
                ]),
            );
            if data.is_empty() {
                continue;
            }
            per_cell.push(normalize_cell(data, &self.columns.regular_cycle_number));
        }

        if per_cell.is_empty() {
            log(
                Level::Info,
                Domain::Aggregate,
                "no_cycle_data",
                obj(&[("requested", json!(ids.len()))]),
            );
            return Table::empty();
        }
        let loaded = per_cell.len();
        let mut out = Table::concat(per_cell);

        if let Some(meta) = metadata.filter(|m| !m.is_empty()) {
            out = join_metadata(&out, meta, &self.columns.id);
        }
        if out.has_column(&self.columns.active_mass) {
            out = add_specific_columns(out, &self.columns.active_mass);
        }

        log(
            Level::Info,
            Domain::Aggregate,
            "aggregated",
            obj(&[
                ("requested", json!(ids.len())),
                ("loaded", json!(loaded)),
                ("rows", json!(out.height())),
                ("columns", json!(out.width())),
            ]),
        );
        out
    }
}

fn mentions_capacity_or_energy(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("capacity") || lower.contains("energy")
}

/// Measurement columns that get normalized: name mentions capacity or
/// energy, holds at least one number, and is not itself derived.
pub fn normalization_columns(table: &Table) -> Vec<String> {
    table
        .columns()
        .into_iter()
        .filter(|c| mentions_capacity_or_energy(c) && !is_derived(c))
        .filter(|c| {
            table
                .column_f64(c)
                .map(|vals| vals.iter().any(Option::is_some))
                .unwrap_or(false)
        })
        .collect()
}

/// Nearest-rank percentile over the non-null values; `q` in `[0, 1]`.
pub fn percentile_nearest(values: &[Option<f64>], q: f64) -> Option<f64> {
    let ca = Float64Chunked::from_slice_options("values", values);
    ca.quantile(q.clamp(0.0, 1.0), QuantileInterpolOptions::Nearest)
        .ok()
        .flatten()
}

fn divide_column(values: &[Option<f64>], denominator: Option<f64>) -> Vec<Option<f64>> {
    match denominator.filter(|d| *d != 0.0 && d.is_finite()) {
        Some(d) => values.iter().map(|v| v.map(|x| x / d)).collect(),
        None => vec![None; values.len()],
    }
}

/// Add `<col>_norm_reg` (value / value at regular cycle 1) and
/// `<col>_norm_p95` (value / 95th percentile) for one cell's rows. A cell
/// without a regular cycle 1 gets null reg-normalized columns.
pub fn normalize_cell(table: Table, regular_cycle_col: &str) -> Table {
    let reference_row = table.column_f64(regular_cycle_col).and_then(|cycles| {
        cycles.iter().position(|c| *c == Some(1.0))
    });

    let mut out = table;
    for col in normalization_columns(&out) {
        let Some(values) = out.column_f64(&col) else {
            continue;
        };
        let first = reference_row.and_then(|r| values[r]);
        if first.is_none() {
            log(
                Level::Debug,
                Domain::Aggregate,
                "reg_reference_missing",
                obj(&[("column", v_str(&col))]),
            );
        }
        let p95 = percentile_nearest(&values, 0.95);

        let reg = divide_column(&values, first);
        let pct = divide_column(&values, p95);
        out = out
            .with_f64_column(&format!("{}{}", col, NORM_REG_SUFFIX), reg)
            .with_f64_column(&format!("{}{}", col, NORM_P95_SUFFIX), pct);
    }
    out
}

/// Left join metadata columns the cycle table does not already have.
pub fn join_metadata(cycles: &Table, metadata: &Table, id_col: &str) -> Table {
    let extra: Vec<String> = metadata
        .columns()
        .into_iter()
        .filter(|c| c.as_str() != id_col && !cycles.has_column(c))
        .collect();
    if extra.is_empty() {
        return cycles.clone();
    }
    cycles.left_join(metadata, id_col, &extra)
}

/// Per-gram values from the active mass: capacity columns become mAh/g,
/// energy columns Wh/g. Rows without a positive mass get null.
pub fn add_specific_columns(table: Table, mass_col: &str) -> Table {
    let Some(mass) = table.column_f64(mass_col) else {
        return table;
    };
    let targets: Vec<(String, String, f64)> = table
        .columns()
        .into_iter()
        .filter(|c| !is_derived(c))
        .filter_map(|c| {
            let lower = c.to_lowercase();
            if lower.ends_with("capacity") {
                let target = format!("{}{}", c, SPECIFIC_CAPACITY_SUFFIX);
                Some((c, target, 1000.0))
            } else if lower.ends_with("energy") {
                let target = format!("{}{}", c, SPECIFIC_ENERGY_SUFFIX);
                Some((c, target, 1.0))
            } else {
                None
            }
        })
        .collect();

    let mut out = table;
    for (source, target, scale) in targets {
        let Some(values) = out.column_f64(&source) else {
            continue;
        };
        let derived: Vec<Option<f64>> = values
            .iter()
            .zip(&mass)
            .map(|(v, m)| match (v, m) {
                (Some(v), Some(m)) if *m > 0.0 => Some(scale * v / m),
                _ => None,
            })
            .collect();
        out = out.with_f64_column(&target, derived);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(id: i64, caps: &[(i64, Option<f64>)]) -> Table {
        let rows: Vec<serde_json::Value> = caps
            .iter()
            .map(|(n, c)| {
                json!({"cell_id": id, "cycle_number": n + 2, "regular_cycle_number": n,
                       "discharge_capacity": c, "coulombic_efficiency": 0.99})
            })
            .collect();
        Table::from_json_rows(&rows)
    }

    #[test]
    fn test_reg_normalization_is_one_at_first_cycle() {
        let t = normalize_cell(
            cell(1, &[(1, Some(2.0)), (2, Some(1.9)), (3, Some(1.8))]),
            "regular_cycle_number",
        );
        assert_eq!(t.value(0, "discharge_capacity_norm_reg"), Some(json!(1.0)));
        assert_eq!(t.value(2, "discharge_capacity_norm_reg"), Some(json!(0.9)));
        assert!(!t.has_column("coulombic_efficiency_norm_reg"));
    }

    #[test]
    fn test_p95_normalization() {
        let caps: Vec<(i64, Option<f64>)> = (1..=21).map(|n| (n, Some(n as f64))).collect();
        let t = normalize_cell(cell(1, &caps), "regular_cycle_number");
        let norm = t.column_f64("discharge_capacity_norm_p95").unwrap();
        // nearest rank of 21 values at 0.95 is index 19 -> value 20
        assert_eq!(norm[19], Some(1.0));
        assert!(norm.iter().flatten().all(|v| *v <= 21.0 / 20.0));
    }

    #[test]
    fn test_missing_first_cycle_yields_null_not_panic() {
        let t = normalize_cell(cell(1, &[(2, Some(1.9)), (3, Some(1.8))]), "regular_cycle_number");
        assert_eq!(t.value(0, "discharge_capacity_norm_reg"), Some(serde_json::Value::Null));
        assert!(t.value(0, "discharge_capacity_norm_p95").map(|v| v.is_number()).unwrap_or(false));
    }

    #[test]
    fn test_null_measurements_stay_null() {
        let t = normalize_cell(cell(1, &[(1, Some(2.0)), (2, None)]), "regular_cycle_number");
        assert_eq!(t.value(1, "discharge_capacity_norm_reg"), Some(serde_json::Value::Null));
    }

    #[test]
    fn test_percentile_nearest() {
        assert_eq!(percentile_nearest(&[], 0.95), None);
        assert_eq!(percentile_nearest(&[None, None], 0.95), None);
        assert_eq!(percentile_nearest(&[Some(3.0)], 0.95), Some(3.0));
        let values = [Some(4.0), None, Some(1.0), Some(3.0), Some(2.0)];
        assert_eq!(percentile_nearest(&values, 0.5), Some(3.0));
    }

    #[test]
    fn test_join_skips_colliding_columns() {
        let cycles = Table::from_json_rows(&[json!({"cell_id": 1, "cell_name": "from-cycles", "discharge_capacity": 1.0})]);
        let meta = Table::from_json_rows(&[json!({"cell_id": 1, "cell_name": "from-meta", "design_name": "A"})]);
        let out = join_metadata(&cycles, &meta, "cell_id");
        assert_eq!(out.columns(), &["cell_id", "cell_name", "discharge_capacity", "design_name"]);
        assert_eq!(out.value(0, "cell_name"), Some(json!("from-cycles")));
        assert_eq!(out.value(0, "design_name"), Some(json!("A")));
    }

    #[test]
    fn test_specific_columns_null_safe() {
        let t = Table::from_json_rows(&[
            json!({"cell_id": 1, "discharge_capacity": 0.002, "discharge_energy": 0.01, "total_active_mass_g": 0.01}),
            json!({"cell_id": 2, "discharge_capacity": 0.002, "discharge_energy": 0.01, "total_active_mass_g": 0}),
            json!({"cell_id": 3, "discharge_capacity": 0.002, "discharge_energy": 0.01, "total_active_mass_g": null}),
        ]);
        let out = add_specific_columns(t, "total_active_mass_g");
        let cap = out.column_f64("discharge_capacity_specific_mAh_g").unwrap();
        let energy = out.column_f64("discharge_energy_specific_Wh_g").unwrap();
        assert!((cap[0].unwrap() - 200.0).abs() < 1e-9);
        assert!((energy[0].unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(cap[1], None);
        assert_eq!(cap[2], None);
        assert_eq!(energy[1], None);
    }

    #[test]
    fn test_specific_skips_normalized_columns() {
        let t = Table::from_json_rows(&[json!({
            "discharge_capacity": 1.0, "discharge_capacity_norm_reg": 1.0, "total_active_mass_g": 2.0
        })]);
        let out = add_specific_columns(t, "total_active_mass_g");
        assert!(out.has_column("discharge_capacity_specific_mAh_g"));
        assert!(!out.has_column("discharge_capacity_norm_reg_specific_mAh_g"));
    }
}
