use anyhow::{bail, Result};
use std::time::Duration;

/// Names of the data-dependent columns the pipeline relies on.
#[derive(Debug, Clone)]
pub struct ColumnConfig {
    pub id: String,
    pub name: String,
    pub regular_cycles: String,
    pub regular_cycle_number: String,
    pub active_mass: String,
    /// Parameter name of the per-cell cycle query
    pub cycle_param: String,
    /// Candidate columns for the dropdown filters, in display order
    pub filter_columns: Vec<String>,
    /// Columns shown next to the id by default
    pub default_display: Vec<String>,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            id: "cell_id".to_string(),
            name: "cell_name".to_string(),
            regular_cycles: "regular_cycles".to_string(),
            regular_cycle_number: "regular_cycle_number".to_string(),
            active_mass: "total_active_mass_g".to_string(),
            cycle_param: "cell_ids".to_string(),
            filter_columns: [
                "design_name",
                "experiment_group",
                "layer_types",
                "test_status",
                "test_year",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            default_display: [
                "cell_name",
                "actual_nominal_capacity_ah",
                "regular_cycles",
                "last_discharge_capacity",
                "discharge_capacity_retention",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub redash_url: String,
    pub api_key: Option<String>,
    pub cell_query_id: String,
    pub cycle_query_id: String,
    pub analysis_query_id: Option<String>,
    pub cache_ttl_secs: u64,
    pub max_cache_entries: usize,
    /// Cells need strictly more regular cycles than this to be listed
    pub min_regular_cycles: f64,
    pub http_timeout_secs: u64,
    /// Row selection requests a cycle load without an explicit load action
    pub auto_load: bool,
    pub columns: ColumnConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redash_url: "http://localhost:5000".to_string(),
            api_key: None,
            cell_query_id: "24".to_string(),
            cycle_query_id: "28".to_string(),
            analysis_query_id: None,
            cache_ttl_secs: 300,
            max_cache_entries: 100,
            min_regular_cycles: 20.0,
            http_timeout_secs: 30,
            auto_load: false,
            columns: ColumnConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key).as_deref().map(str::trim) {
        Ok("1") | Ok("true") | Ok("yes") | Ok("on") => true,
        Ok("0") | Ok("false") | Ok("no") | Ok("off") => false,
        _ => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Config::default();
        let mut columns = ColumnConfig::default();
        if let Ok(id) = std::env::var("CELL_ID_COLUMN") {
            columns.id = id;
        }
        if let Ok(param) = std::env::var("CYCLE_ID_PARAM") {
            columns.cycle_param = param;
        }
        Self {
            redash_url: std::env::var("REDASH_URL").unwrap_or(d.redash_url),
            api_key: std::env::var("REDASH_API_KEY").ok().filter(|k| !k.is_empty()),
            cell_query_id: std::env::var("CELL_QUERY_ID").unwrap_or(d.cell_query_id),
            cycle_query_id: std::env::var("CYCLE_QUERY_ID").unwrap_or(d.cycle_query_id),
            analysis_query_id: std::env::var("ML_CYCLE_QUERY_ID").ok(),
            cache_ttl_secs: env_parse("CACHE_TTL", d.cache_ttl_secs),
            max_cache_entries: env_parse("MAX_CACHE_SIZE", d.max_cache_entries),
            min_regular_cycles: env_parse("MIN_REGULAR_CYCLES", d.min_regular_cycles),
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", d.http_timeout_secs),
            auto_load: env_flag("AUTO_LOAD", d.auto_load),
            columns,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Checks needed before talking to the live query service.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.is_none() {
            bail!("REDASH_API_KEY environment variable is required");
        }
        if url::Url::parse(&self.redash_url).is_err() {
            bail!("REDASH_URL is not a valid URL: {}", self.redash_url);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.min_regular_cycles, 20.0);
        assert_eq!(cfg.columns.id, "cell_id");
        assert_eq!(cfg.columns.filter_columns.len(), 5);
    }

    #[test]
    fn test_validate_requires_api_key() {
        let mut cfg = Config::default();
        assert!(cfg.validate().is_err());
        cfg.api_key = Some("k".to_string());
        assert!(cfg.validate().is_ok());
        cfg.redash_url = "not a url".to_string();
        assert!(cfg.validate().is_err());
    }
}
