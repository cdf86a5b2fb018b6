//! Query results as polars data frames.
//!
//! Query results arrive as arrays of JSON objects whose keys are not known
//! ahead of time. `Table` builds a typed `DataFrame` from them: each column
//! gets the narrowest dtype that holds every non-null cell. Numeric text
//! ("2.0") is read as a number because some query backends serialize
//! decimals as strings. Row access hands out polars `AnyValue`s; the
//! `any_*` helpers turn them into text, floats or JSON.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::logging::{log, obj, v_str, Domain, Level};

/// Temporary text key used by `left_join`.
const JOIN_KEY: &str = "__join_key";

/// Stable identifier of a cell (test article), kept as its text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        EntityId(n.to_string())
    }
}

// =============================================================================
// Cell conversions
// =============================================================================

/// Numeric view of a cell. Numeric strings are accepted.
pub fn any_as_f64(value: &AnyValue<'_>) -> Option<f64> {
    match value {
        AnyValue::Null | AnyValue::Boolean(_) => None,
        AnyValue::String(s) => s.trim().parse::<f64>().ok(),
        AnyValue::StringOwned(s) => s.trim().parse::<f64>().ok(),
        other => other.extract::<f64>(),
    }
}

/// Text view of a cell; `None` for null. Floats keep a decimal point
/// (`2.0`), integers do not.
pub fn any_to_text(value: &AnyValue<'_>) -> Option<String> {
    match value {
        AnyValue::Null => None,
        AnyValue::String(s) => Some((*s).to_string()),
        AnyValue::StringOwned(s) => Some(s.to_string()),
        AnyValue::Boolean(b) => Some(b.to_string()),
        AnyValue::Float32(_) | AnyValue::Float64(_) => {
            value.extract::<f64>().map(|f| format!("{:?}", f))
        }
        v if v.dtype().is_integer() => v.extract::<i64>().map(|n| n.to_string()),
        other => Some(other.to_string()),
    }
}

pub fn any_to_json(value: &AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(*b),
        AnyValue::String(s) => Value::String((*s).to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        AnyValue::Float32(_) | AnyValue::Float64(_) => {
            value.extract::<f64>().map(f64_value).unwrap_or(Value::Null)
        }
        v if v.dtype().is_integer() => v.extract::<i64>().map(|n| json!(n)).unwrap_or(Value::Null),
        other => Value::String(other.to_string()),
    }
}

/// Wrap a float as a JSON value; non-finite results become null.
pub fn f64_value(x: f64) -> Value {
    serde_json::Number::from_f64(x)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

// =============================================================================
// Column building from JSON
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Empty,
    Bool,
    Int,
    Float,
    Text,
}

impl CellKind {
    fn of(value: &Value) -> Self {
        match value {
            Value::Null => CellKind::Empty,
            Value::Bool(_) => CellKind::Bool,
            Value::Number(n) if n.is_i64() => CellKind::Int,
            Value::Number(_) => CellKind::Float,
            Value::String(s) => Self::of_text(s),
            _ => CellKind::Text,
        }
    }

    // "nan" and "inf" parse as floats but are labels here.
    fn of_text(s: &str) -> Self {
        let s = s.trim();
        if !s.chars().any(|c| c.is_ascii_digit()) {
            CellKind::Text
        } else if s.parse::<i64>().is_ok() {
            CellKind::Int
        } else if s.parse::<f64>().is_ok() {
            CellKind::Float
        } else {
            CellKind::Text
        }
    }

    fn merge(self, other: CellKind) -> CellKind {
        match (self, other) {
            (CellKind::Empty, k) | (k, CellKind::Empty) => k,
            (a, b) if a == b => a,
            (CellKind::Int, CellKind::Float) | (CellKind::Float, CellKind::Int) => CellKind::Float,
            _ => CellKind::Text,
        }
    }
}

fn json_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn json_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn json_to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn series_from_json(name: &str, values: &[&Value]) -> Series {
    let kind = values
        .iter()
        .fold(CellKind::Empty, |acc, v| acc.merge(CellKind::of(v)));
    match kind {
        CellKind::Bool => Series::new(
            name,
            values.iter().map(|v| v.as_bool()).collect::<Vec<_>>(),
        ),
        CellKind::Int => Series::new(
            name,
            values.iter().map(|v| json_as_i64(v)).collect::<Vec<_>>(),
        ),
        CellKind::Float => Series::new(
            name,
            values.iter().map(|v| json_as_f64(v)).collect::<Vec<_>>(),
        ),
        CellKind::Empty | CellKind::Text => Series::new(
            name,
            values.iter().map(|v| json_to_text(v)).collect::<Vec<_>>(),
        ),
    }
}

// =============================================================================
// Table
// =============================================================================

#[derive(Debug, Clone)]
pub struct Table {
    df: DataFrame,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            df: DataFrame::empty(),
        }
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.columns() == other.columns() && self.df.equals_missing(&other.df)
    }
}

impl From<DataFrame> for Table {
    fn from(df: DataFrame) -> Self {
        Self { df }
    }
}

/// Borrowed view of one row, addressed by column name.
#[derive(Clone, Copy)]
pub struct RowRef<'a> {
    table: &'a Table,
    idx: usize,
}

impl<'a> RowRef<'a> {
    pub fn get(&self, column: &str) -> Option<AnyValue<'a>> {
        self.table.any_value(self.idx, column)
    }

    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).and_then(|v| any_to_text(&v))
    }

    pub fn number(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(|v| any_as_f64(&v))
    }

    pub fn index(&self) -> usize {
        self.idx
    }
}

impl Table {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from a JSON array of objects; non-object items are skipped.
    /// Column order is order of first appearance; absent keys are null.
    pub fn from_json_rows(rows: &[Value]) -> Self {
        let records: Vec<&Map<String, Value>> = rows.iter().filter_map(Value::as_object).collect();
        let mut names: Vec<&String> = Vec::new();
        let mut seen: HashSet<&String> = HashSet::new();
        for record in &records {
            for key in record.keys() {
                if seen.insert(key) {
                    names.push(key);
                }
            }
        }
        let columns: Vec<Series> = names
            .iter()
            .map(|name| {
                let values: Vec<&Value> = records
                    .iter()
                    .map(|r| r.get(name.as_str()).unwrap_or(&Value::Null))
                    .collect();
                series_from_json(name, &values)
            })
            .collect();
        match DataFrame::new(columns) {
            Ok(df) => Self { df },
            Err(err) => {
                log_frame_error("from_json_rows", &err);
                Self::empty()
            }
        }
    }

    pub fn columns(&self) -> Vec<String> {
        self.df
            .get_column_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    pub fn height(&self) -> usize {
        self.df.height()
    }

    pub fn width(&self) -> usize {
        self.df.width()
    }

    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.df.column(name).is_ok()
    }

    pub fn dtype(&self, column: &str) -> Option<DataType> {
        self.df.column(column).ok().map(|s| s.dtype().clone())
    }

    pub fn row(&self, idx: usize) -> Option<RowRef<'_>> {
        (idx < self.height()).then_some(RowRef { table: self, idx })
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = RowRef<'_>> {
        (0..self.height()).map(move |idx| RowRef { table: self, idx })
    }

    pub fn any_value(&self, row: usize, column: &str) -> Option<AnyValue<'_>> {
        if row >= self.height() {
            return None;
        }
        self.df.column(column).ok()?.get(row).ok()
    }

    /// Cell as JSON; `None` when the row or column does not exist.
    pub fn value(&self, row: usize, column: &str) -> Option<Value> {
        self.any_value(row, column).map(|v| any_to_json(&v))
    }

    /// Numeric column as floats. Text and boolean columns give all `None`.
    pub fn column_f64(&self, column: &str) -> Option<Vec<Option<f64>>> {
        let series = self.df.column(column).ok()?;
        if !series.dtype().is_numeric() {
            return Some(vec![None; series.len()]);
        }
        let cast = series.cast(&DataType::Float64).ok()?;
        let values = cast.f64().ok()?;
        Some(values.into_iter().collect())
    }

    pub fn filter<F>(&self, mut keep: F) -> Table
    where
        F: FnMut(RowRef<'_>) -> bool,
    {
        let mask: Vec<bool> = self.iter_rows().map(|r| keep(r)).collect();
        let mask = BooleanChunked::from_slice("mask", &mask);
        match self.df.filter(&mask) {
            Ok(df) => Table { df },
            Err(err) => {
                log_frame_error("filter", &err);
                Table {
                    df: self.df.head(Some(0)),
                }
            }
        }
    }

    /// Project onto the named columns, in the given order. Unknown and
    /// repeated names are skipped.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Table {
        let mut seen: HashSet<&str> = HashSet::new();
        let picks: Vec<Series> = names
            .iter()
            .map(|n| n.as_ref())
            .filter(|n| seen.insert(*n))
            .filter_map(|n| self.df.column(n).ok().cloned())
            .collect();
        DataFrame::new(picks).map(Table::from).unwrap_or_default()
    }

    /// Rows at the given indices, in the given order. Out-of-range indices
    /// are skipped.
    pub fn take(&self, indices: &[usize]) -> Table {
        let height = self.height();
        let idx: Vec<IdxSize> = indices
            .iter()
            .filter(|&&i| i < height)
            .map(|&i| i as IdxSize)
            .collect();
        let idx = IdxCa::from_vec("idx", idx);
        match self.df.take(&idx) {
            Ok(df) => Table { df },
            Err(err) => {
                log_frame_error("take", &err);
                Table {
                    df: self.df.head(Some(0)),
                }
            }
        }
    }

    /// Add or replace a float column. Short `values` are padded with null;
    /// non-finite values become null.
    pub fn with_f64_column(self, name: &str, mut values: Vec<Option<f64>>) -> Table {
        values.resize(self.height(), None);
        let values: Vec<Option<f64>> = values
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect();
        let mut df = self.df;
        if let Err(err) = df.with_column(Series::new(name, values)) {
            log_frame_error("with_f64_column", &err);
        }
        Table { df }
    }

    /// Stack tables vertically (diagonal concat). The result has the union
    /// of all columns in first-seen order; cells a table lacks are null.
    /// Columns whose dtypes differ between tables are widened first: mixed
    /// numbers to float, anything else to text.
    pub fn concat(tables: Vec<Table>) -> Table {
        let frames: Vec<DataFrame> = tables
            .into_iter()
            .map(|t| t.df)
            .filter(|df| df.width() > 0)
            .collect();
        if frames.is_empty() {
            return Table::empty();
        }
        let targets = common_dtypes(&frames);
        let aligned: Vec<DataFrame> = frames
            .into_iter()
            .map(|df| cast_to(df, &targets))
            .collect();
        match polars::functions::concat_df_diagonal(&aligned) {
            Ok(df) => Table { df },
            Err(err) => {
                log_frame_error("concat", &err);
                Table::empty()
            }
        }
    }

    /// Left join `right` on `key`, appending `right_columns` that do not
    /// already exist here. Keys are compared as text; the first matching
    /// right row wins, so the row count never changes.
    pub fn left_join(&self, right: &Table, key: &str, right_columns: &[String]) -> Table {
        if !self.has_column(key) || !right.has_column(key) {
            return self.clone();
        }
        let picks: Vec<&String> = right_columns
            .iter()
            .filter(|c| c.as_str() != key && !self.has_column(c) && right.has_column(c))
            .collect();
        if picks.is_empty() {
            return self.clone();
        }

        let mut seen = HashSet::new();
        let first_rows: Vec<usize> = right
            .iter_rows()
            .filter_map(|r| r.text(key).filter(|k| seen.insert(k.clone())).map(|_| r.index()))
            .collect();
        let right = right.take(&first_rows);

        let mut right_cols = vec![right.key_series(key)];
        right_cols.extend(picks.iter().filter_map(|c| right.df.column(c).ok().cloned()));
        let joined = DataFrame::new(right_cols).and_then(|right_df| {
            let mut left_df = self.df.clone();
            left_df.with_column(self.key_series(key))?;
            left_df
                .join(
                    &right_df,
                    [JOIN_KEY],
                    [JOIN_KEY],
                    JoinArgs::new(JoinType::Left),
                )?
                .drop(JOIN_KEY)
        });
        match joined {
            Ok(df) => Table { df },
            Err(err) => {
                log_frame_error("left_join", &err);
                self.clone()
            }
        }
    }

    fn key_series(&self, key: &str) -> Series {
        let keys: Vec<Option<String>> = self.iter_rows().map(|r| r.text(key)).collect();
        Series::new(JOIN_KEY, keys)
    }

    /// Sorted distinct non-null values of a column, as text.
    pub fn unique_text(&self, column: &str) -> Vec<String> {
        let Some(unique) = self
            .df
            .column(column)
            .ok()
            .and_then(|s| s.drop_nulls().unique().ok())
        else {
            return Vec::new();
        };
        (0..unique.len())
            .filter_map(|i| unique.get(i).ok())
            .filter_map(|v| any_to_text(&v))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        let columns = self.columns();
        self.iter_rows()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| {
                        let v = row.get(c).map(|v| any_to_json(&v)).unwrap_or(Value::Null);
                        (c.clone(), v)
                    })
                    .collect()
            })
            .collect()
    }
}

/// Per-column dtype every frame can be cast to. All-null columns do not
/// vote unless no frame has values for that column.
fn common_dtypes(frames: &[DataFrame]) -> HashMap<String, DataType> {
    let mut targets: HashMap<String, DataType> = HashMap::new();
    for series in frames.iter().flat_map(|df| df.get_columns()) {
        if series.null_count() == series.len() {
            continue;
        }
        let dtype = series.dtype();
        targets
            .entry(series.name().to_string())
            .and_modify(|current| {
                if current != dtype {
                    *current = if current.is_numeric() && dtype.is_numeric() {
                        DataType::Float64
                    } else {
                        DataType::String
                    };
                }
            })
            .or_insert_with(|| dtype.clone());
    }
    for series in frames.iter().flat_map(|df| df.get_columns()) {
        targets
            .entry(series.name().to_string())
            .or_insert_with(|| series.dtype().clone());
    }
    targets
}

fn cast_to(df: DataFrame, targets: &HashMap<String, DataType>) -> DataFrame {
    let columns: Vec<Series> = df
        .get_columns()
        .iter()
        .map(|s| match targets.get(s.name()) {
            Some(dtype) if dtype != s.dtype() => s.cast(dtype).unwrap_or_else(|_| s.clone()),
            _ => s.clone(),
        })
        .collect();
    DataFrame::new(columns).unwrap_or(df)
}

fn log_frame_error(op: &str, err: &PolarsError) {
    log(
        Level::Warn,
        Domain::Aggregate,
        "frame_error",
        obj(&[("op", v_str(op)), ("msg", v_str(&err.to_string()))]),
    );
}

impl Serialize for Table {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_records().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: Value) -> Table {
        Table::from_json_rows(rows.as_array().map(Vec::as_slice).unwrap_or(&[]))
    }

    #[test]
    fn test_from_json_rows_keeps_first_seen_order() {
        let t = table(json!([
            {"cell_id": 1, "cell_name": "a"},
            {"cell_id": 2, "extra": true}
        ]));
        assert_eq!(t.columns(), &["cell_id", "cell_name", "extra"]);
        assert_eq!(t.value(1, "cell_name"), Some(Value::Null));
        assert_eq!(t.value(0, "extra"), Some(Value::Null));
        assert_eq!(t.value(5, "cell_id"), None);
    }

    #[test]
    fn test_column_dtypes_from_json() {
        let t = table(json!([
            {"id": 1, "cap": 2, "label": "a", "ok": true, "dec": "2.0", "blank": null},
            {"id": 2, "cap": 1.5, "label": 3, "ok": false, "dec": "1.9", "blank": null}
        ]));
        assert_eq!(t.dtype("id"), Some(DataType::Int64));
        assert_eq!(t.dtype("cap"), Some(DataType::Float64));
        assert_eq!(t.dtype("label"), Some(DataType::String));
        assert_eq!(t.dtype("ok"), Some(DataType::Boolean));
        assert_eq!(t.dtype("dec"), Some(DataType::Float64));
        assert_eq!(t.dtype("blank"), Some(DataType::String));
        assert_eq!(t.value(1, "label"), Some(json!("3")));
        assert_eq!(t.value(1, "dec"), Some(json!(1.9)));
    }

    #[test]
    fn test_word_like_numbers_stay_text() {
        let t = table(json!([{"step": "nan"}, {"step": "inf"}]));
        assert_eq!(t.dtype("step"), Some(DataType::String));
    }

    #[test]
    fn test_concat_fills_missing_with_null() {
        let a = table(json!([{"cell_id": 1, "discharge_capacity": 1.0}]));
        let b = table(json!([{"cell_id": 2, "charge_capacity": 2.0}]));
        let out = Table::concat(vec![a, b]);
        assert_eq!(out.height(), 2);
        assert_eq!(out.columns(), &["cell_id", "discharge_capacity", "charge_capacity"]);
        assert_eq!(out.value(0, "charge_capacity"), Some(Value::Null));
        assert_eq!(out.value(1, "discharge_capacity"), Some(Value::Null));
        assert_eq!(out.value(1, "charge_capacity"), Some(json!(2.0)));
    }

    #[test]
    fn test_concat_widens_mismatched_dtypes() {
        let a = table(json!([{"cell_id": 1, "discharge_capacity": 2}]));
        let b = table(json!([{"cell_id": "B-7", "discharge_capacity": 1.5}]));
        let out = Table::concat(vec![a, b]);
        assert_eq!(out.height(), 2);
        assert_eq!(out.dtype("discharge_capacity"), Some(DataType::Float64));
        assert_eq!(out.value(0, "discharge_capacity"), Some(json!(2.0)));
        assert_eq!(out.dtype("cell_id"), Some(DataType::String));
        assert_eq!(out.value(1, "cell_id"), Some(json!("B-7")));
    }

    #[test]
    fn test_left_join_keeps_unmatched_rows() {
        let left = table(json!([{"cell_id": 1, "x": 1}, {"cell_id": 9, "x": 2}]));
        let right = table(json!([{"cell_id": "1", "design_name": "A"}]));
        let out = left.left_join(&right, "cell_id", &["design_name".to_string()]);
        assert_eq!(out.height(), 2);
        assert_eq!(out.value(0, "design_name"), Some(json!("A")));
        assert_eq!(out.value(1, "design_name"), Some(Value::Null));
        assert_eq!(out.value(1, "cell_id"), Some(json!(9)));
        assert!(!out.has_column(JOIN_KEY));
    }

    #[test]
    fn test_left_join_first_match_wins() {
        let left = table(json!([{"cell_id": 1}]));
        let right = table(json!([
            {"cell_id": 1, "design_name": "first"},
            {"cell_id": 1, "design_name": "second"}
        ]));
        let out = left.left_join(&right, "cell_id", &["design_name".to_string()]);
        assert_eq!(out.height(), 1);
        assert_eq!(out.value(0, "design_name"), Some(json!("first")));
    }

    #[test]
    fn test_left_join_never_overwrites_existing_column() {
        let left = table(json!([{"cell_id": 1, "cell_name": "cycle-side"}]));
        let right = table(json!([{"cell_id": 1, "cell_name": "meta-side"}]));
        let out = left.left_join(&right, "cell_id", &["cell_name".to_string()]);
        assert_eq!(out.width(), 2);
        assert_eq!(out.value(0, "cell_name"), Some(json!("cycle-side")));
    }

    #[test]
    fn test_unique_text_sorted_without_nulls() {
        let t = table(json!([
            {"design_name": "B"}, {"design_name": null}, {"design_name": "A"}, {"design_name": "B"}
        ]));
        assert_eq!(t.unique_text("design_name"), vec!["A", "B"]);
        assert!(t.unique_text("missing").is_empty());
    }

    #[test]
    fn test_select_and_take() {
        let t = table(json!([
            {"a": 1, "b": 2, "c": 3},
            {"a": 4, "b": 5, "c": 6}
        ]));
        let s = t.select(&["c", "missing", "a", "c"]);
        assert_eq!(s.columns(), &["c", "a"]);
        let r = t.take(&[1, 7]);
        assert_eq!(r.height(), 1);
        assert_eq!(r.value(0, "a"), Some(json!(4)));
    }

    #[test]
    fn test_filter_by_row() {
        let t = table(json!([{"a": 1}, {"a": 2}, {"a": 3}]));
        let out = t.filter(|r| r.number("a").map(|a| a >= 2.0).unwrap_or(false));
        assert_eq!(out.height(), 2);
        assert_eq!(out.columns(), &["a"]);
        let none = t.filter(|_| false);
        assert!(none.is_empty());
        assert_eq!(none.columns(), &["a"]);
    }

    #[test]
    fn test_with_f64_column_replaces_in_place() {
        let t = table(json!([{"a": 1, "b": 2}, {"a": 3, "b": 4}]));
        let t = t.with_f64_column("a", vec![Some(10.0), Some(f64::NAN)]);
        assert_eq!(t.columns(), &["a", "b"]);
        assert_eq!(t.value(0, "a"), Some(json!(10.0)));
        assert_eq!(t.value(1, "a"), Some(Value::Null));
    }

    #[test]
    fn test_cell_helpers() {
        assert_eq!(any_as_f64(&AnyValue::String("1.5")), Some(1.5));
        assert_eq!(any_as_f64(&AnyValue::Null), None);
        assert_eq!(any_to_text(&AnyValue::Int64(2)), Some("2".to_string()));
        assert_eq!(any_to_text(&AnyValue::Float64(2.0)), Some("2.0".to_string()));
        assert_eq!(any_to_text(&AnyValue::String("x")), Some("x".to_string()));
        assert_eq!(f64_value(f64::INFINITY), Value::Null);
    }

    #[test]
    fn test_serializes_as_records() {
        let t = table(json!([{"cell_id": 1, "design_name": null}]));
        let out = serde_json::to_value(&t).unwrap();
        assert_eq!(out, json!([{"cell_id": 1, "design_name": null}]));
    }
}
