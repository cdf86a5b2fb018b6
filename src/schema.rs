//! Runtime schema of an aggregated cycle table.
//!
//! The joined table's columns depend on what the queries return, so axis
//! and group-by choices are derived from a descriptor computed once per
//! load instead of being recomputed at every use.

use serde::Serialize;

use crate::config::ColumnConfig;
use crate::table::Table;

pub const NORM_REG_SUFFIX: &str = "_norm_reg";
pub const NORM_P95_SUFFIX: &str = "_norm_p95";
pub const SPECIFIC_CAPACITY_SUFFIX: &str = "_specific_mAh_g";
pub const SPECIFIC_ENERGY_SUFFIX: &str = "_specific_Wh_g";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
    Identifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnOrigin {
    Cycle,
    Metadata,
    Derived,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub kind: ColumnKind,
    pub origin: ColumnOrigin,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnInfo>,
    id_column: String,
    name_column: String,
}

pub fn is_derived(name: &str) -> bool {
    [
        NORM_REG_SUFFIX,
        NORM_P95_SUFFIX,
        SPECIFIC_CAPACITY_SUFFIX,
        SPECIFIC_ENERGY_SUFFIX,
    ]
    .iter()
    .any(|s| name.ends_with(s))
}

/// Display label for a column: underscores become spaces and every word
/// is capitalized (`discharge_capacity` -> `Discharge Capacity`).
pub fn humanize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_alpha = false;
    for ch in name.replace('_', " ").chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

/// A column is numeric when its dtype is. Numeric text was already read
/// as numbers when the table was built; all-null columns are text.
fn is_numeric_column(table: &Table, name: &str) -> bool {
    table.dtype(name).map(|d| d.is_numeric()).unwrap_or(false)
}

impl TableSchema {
    /// `metadata_columns` are the columns of the metadata table that was
    /// joined in; anything else not derived is attributed to cycle data.
    pub fn infer(table: &Table, metadata_columns: &[String], cols: &ColumnConfig) -> Self {
        let columns = table
            .columns()
            .into_iter()
            .map(|name| {
                let kind = if name == cols.id || name == cols.name {
                    ColumnKind::Identifier
                } else if is_numeric_column(table, &name) {
                    ColumnKind::Numeric
                } else {
                    ColumnKind::Categorical
                };
                let origin = if is_derived(&name) {
                    ColumnOrigin::Derived
                } else if metadata_columns.contains(&name) {
                    ColumnOrigin::Metadata
                } else {
                    ColumnOrigin::Cycle
                };
                ColumnInfo {
                    name,
                    kind,
                    origin,
                }
            })
            .collect();
        Self {
            columns,
            id_column: cols.id.clone(),
            name_column: cols.name.clone(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Numeric columns that can go on an axis. Metadata columns are
    /// constant per cell and left out.
    pub fn axis_options(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.kind == ColumnKind::Numeric && c.origin != ColumnOrigin::Metadata)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Id and name first, then categorical metadata columns.
    pub fn group_options(&self) -> Vec<String> {
        let mut out = vec![self.id_column.clone(), self.name_column.clone()];
        out.extend(
            self.columns
                .iter()
                .filter(|c| c.kind == ColumnKind::Categorical && c.origin == ColumnOrigin::Metadata)
                .map(|c| c.name.clone()),
        );
        out
    }
}
