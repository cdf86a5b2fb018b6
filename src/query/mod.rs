//! Access to the remote BI query service.
//!
//! ```text
//! QueryClient ──► QueryCache (ttl, injected clock)
//!      │
//!      └──────► QuerySource ──► RedashSource (HTTP)
//!                          └──► MemorySource (fixtures)
//! ```
//!
//! The client is the error boundary: sources return `anyhow::Result`,
//! callers of the client only ever see a table, empty on failure.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::table::Table;

pub mod cache;
pub mod client;
pub mod memory;
pub mod redash;

pub use cache::{CacheKey, Clock, ManualClock, QueryCache, SystemClock};
pub use client::QueryClient;
pub use memory::MemorySource;
pub use redash::RedashSource;

/// Named query parameters. Sorted so that equal maps serialize equally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryParams(pub BTreeMap<String, String>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical text form used in cache keys and logs.
    pub fn serialized(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

#[async_trait]
pub trait QuerySource: Send + Sync {
    /// Run a server-side query and return its result rows.
    async fn run(&self, query_id: &str, params: &QueryParams) -> Result<Table>;
}
