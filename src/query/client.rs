use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::cache::{CacheKey, QueryCache};
use super::{QueryParams, QuerySource};
use crate::logging::{log_cache, log_query_failure, obj, v_str, Domain, Level, ProfileScope};
use crate::table::Table;

/// Cached front of a query source. `fetch` never fails: any transport or
/// parse error is logged and reported as an empty table.
#[derive(Clone)]
pub struct QueryClient {
    source: Arc<dyn QuerySource>,
    cache: Arc<Mutex<QueryCache>>,
}

impl QueryClient {
    pub fn new(source: Arc<dyn QuerySource>, cache: Arc<Mutex<QueryCache>>) -> Self {
        Self { source, cache }
    }

    pub fn cache(&self) -> &Arc<Mutex<QueryCache>> {
        &self.cache
    }

    fn lock_cache(&self) -> MutexGuard<'_, QueryCache> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub async fn fetch(&self, query_id: &str, params: &QueryParams) -> Table {
        let ttl = self.lock_cache().ttl();
        self.fetch_with_ttl(query_id, params, ttl).await
    }

    pub async fn fetch_with_ttl(&self, query_id: &str, params: &QueryParams, ttl: Duration) -> Table {
        let key = CacheKey::new(query_id, params);
        {
            let mut cache = self.lock_cache();
            if let Some(hit) = cache.get_within(&key, ttl) {
                log_cache("hit", query_id, cache.len());
                return hit;
            }
            log_cache("miss", query_id, cache.len());
        }

        let _scope = ProfileScope::with_context("query.fetch", &[("query_id", v_str(query_id))]);
        match self.source.run(query_id, params).await {
            Ok(table) => {
                crate::logging::log(
                    Level::Debug,
                    Domain::Query,
                    "fetched",
                    obj(&[
                        ("query_id", v_str(query_id)),
                        ("params", v_str(&key.params)),
                        ("rows", serde_json::json!(table.height())),
                    ]),
                );
                let mut cache = self.lock_cache();
                cache.put(key, table.clone());
                table
            }
            Err(err) => {
                log_query_failure(query_id, &key.params, &format!("{:#}", err));
                Table::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::cache::ManualClock;
    use crate::query::MemorySource;
    use serde_json::json;

    fn client_with(source: Arc<MemorySource>, clock: Arc<ManualClock>) -> QueryClient {
        let cache = QueryCache::with_clock(Duration::from_secs(300), 100, clock);
        QueryClient::new(source, Arc::new(Mutex::new(cache)))
    }

    #[tokio::test]
    async fn test_second_fetch_is_served_from_cache() {
        let source = Arc::new(MemorySource::new());
        source.insert("24", QueryParams::new(), &[json!({"cell_id": 1})]);
        let clock = Arc::new(ManualClock::default());
        let client = client_with(source.clone(), clock.clone());

        let first = client.fetch("24", &QueryParams::new()).await;
        clock.advance(Duration::from_secs(120));
        let second = client.fetch("24", &QueryParams::new()).await;

        assert_eq!(first, second);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_after_ttl_goes_to_source() {
        let source = Arc::new(MemorySource::new());
        source.insert("24", QueryParams::new(), &[json!({"cell_id": 1})]);
        let clock = Arc::new(ManualClock::default());
        let client = client_with(source.clone(), clock.clone());

        client.fetch("24", &QueryParams::new()).await;
        clock.advance(Duration::from_secs(301));
        client.fetch("24", &QueryParams::new()).await;

        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_empty_and_not_cached() {
        let source = Arc::new(MemorySource::new());
        let clock = Arc::new(ManualClock::default());
        let client = client_with(source.clone(), clock);

        let out = client.fetch("404", &QueryParams::new()).await;
        assert!(out.is_empty());
        client.fetch("404", &QueryParams::new()).await;
        assert_eq!(source.calls(), 2);
    }
}
