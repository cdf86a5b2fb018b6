use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use url::Url;

use super::{QueryParams, QuerySource};
use crate::config::Config;
use crate::table::Table;

/// Client for `POST {base}/api/queries/{id}/results`.
pub struct RedashSource {
    client: Client,
    base: Url,
    api_key: String,
}

// Response envelope: {"query_result": {"data": {"rows": [...]}}}
#[derive(Deserialize, Debug)]
struct Envelope {
    query_result: QueryResult,
}

#[derive(Deserialize, Debug)]
struct QueryResult {
    data: ResultData,
}

#[derive(Deserialize, Debug)]
struct ResultData {
    rows: Vec<Value>,
}

impl RedashSource {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url).with_context(|| format!("invalid base url {}", base_url))?;
        // Url::join drops the last path segment unless it ends with '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self {
            client,
            base,
            api_key: api_key.to_string(),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let key = cfg
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("REDASH_API_KEY is not set"))?;
        Self::new(&cfg.redash_url, key, Duration::from_secs(cfg.http_timeout_secs))
    }

    pub fn results_url(&self, query_id: &str) -> Result<Url> {
        self.base
            .join(&format!("api/queries/{}/results", query_id))
            .with_context(|| format!("building results url for query {}", query_id))
    }
}

/// Extract the result rows from a response body.
pub fn parse_envelope(body: &str) -> Result<Table> {
    let envelope: Envelope =
        serde_json::from_str(body).context("response is not a query_result envelope")?;
    Ok(Table::from_json_rows(&envelope.query_result.data.rows))
}

#[async_trait]
impl QuerySource for RedashSource {
    async fn run(&self, query_id: &str, params: &QueryParams) -> Result<Table> {
        let url = self.results_url(query_id)?;
        let resp = self
            .client
            .post(url)
            .header("Authorization", format!("Key {}", self.api_key))
            .json(&json!({ "parameters": params }))
            .send()
            .await
            .context("query service unreachable")?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("query {} returned HTTP {}", query_id, status.as_u16()));
        }
        let body = resp.text().await.context("reading response body")?;
        parse_envelope(&body)
    }
}
