use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{QueryParams, QuerySource};
use crate::table::Table;

/// Query source backed by canned results. Unknown (query, params) pairs
/// fail the same way an unreachable service would.
///
/// Fixture file format:
/// ```json
/// { "24": [ { "parameters": {}, "rows": [ {"cell_id": 1} ] } ],
///   "28": [ { "parameters": {"cell_ids": "1"}, "rows": [] } ] }
/// ```
#[derive(Debug, Default)]
pub struct MemorySource {
    results: Mutex<HashMap<(String, QueryParams), Table>>,
    calls: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, query_id: &str, params: QueryParams, rows: &[Value]) {
        self.insert_table(query_id, params, Table::from_json_rows(rows));
    }

    pub fn insert_table(&self, query_id: &str, params: QueryParams, table: Table) {
        if let Ok(mut results) = self.results.lock() {
            results.insert((query_id.to_string(), params), table);
        }
    }

    /// Number of `run` calls seen, hits and misses alike.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn from_json(doc: &Value) -> Result<Self> {
        let queries = doc
            .as_object()
            .ok_or_else(|| anyhow!("fixture document must be an object keyed by query id"))?;
        let source = Self::new();
        for (query_id, entries) in queries {
            let Some(entries) = entries.as_array() else {
                bail!("fixtures for query {} must be an array", query_id);
            };
            for entry in entries {
                let params: QueryParams = match entry.get("parameters") {
                    Some(p) => serde_json::from_value(p.clone())
                        .with_context(|| format!("bad parameters for query {}", query_id))?,
                    None => QueryParams::new(),
                };
                let rows = entry
                    .get("rows")
                    .and_then(Value::as_array)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                source.insert(query_id, params, rows);
            }
        }
        Ok(source)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading fixtures {}", path.display()))?;
        let doc: Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing fixtures {}", path.display()))?;
        Self::from_json(&doc)
    }
}

#[async_trait]
impl QuerySource for MemorySource {
    async fn run(&self, query_id: &str, params: &QueryParams) -> Result<Table> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let results = self
            .results
            .lock()
            .map_err(|_| anyhow!("fixture lock poisoned"))?;
        results
            .get(&(query_id.to_string(), params.clone()))
            .cloned()
            .ok_or_else(|| anyhow!("no fixture for query {} {}", query_id, params.serialized()))
    }
}
