//! Time-bounded cache over the remote table catalog.
//!
//! One fetch serves every turn for the TTL window. A fetch failure is
//! surfaced to the caller but never cached, so the next turn retries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::airtable::{AirtableClient, SimplifiedSchema, TableSchema};

#[async_trait]
pub trait SchemaFetcher: Send + Sync {
    async fn fetch_schema(&self) -> anyhow::Result<SimplifiedSchema>;
}

#[async_trait]
impl SchemaFetcher for AirtableClient {
    async fn fetch_schema(&self) -> anyhow::Result<SimplifiedSchema> {
        AirtableClient::fetch_schema(self).await
    }
}

/// Outcome of a cache lookup. `tables` is empty when the fetch failed;
/// `error` then carries the reason for the prompt composer.
#[derive(Debug, Clone)]
pub struct SchemaResult {
    pub tables: Vec<TableSchema>,
    pub error: Option<String>,
}

struct CachedSchema {
    schema: SimplifiedSchema,
    fetched_at: Instant,
}

pub struct SchemaCache {
    fetcher: Arc<dyn SchemaFetcher>,
    ttl: Duration,
    slot: RwLock<Option<CachedSchema>>,
}

impl SchemaCache {
    pub fn new(fetcher: Arc<dyn SchemaFetcher>, ttl: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Return the cached catalog, refreshing it when the TTL has lapsed.
    /// Concurrent callers past the TTL may each fetch once; last write
    /// wins, which is harmless for an idempotent read.
    pub async fn get(&self) -> SchemaResult {
        {
            let slot = self.slot.read().await;
            if let Some(cached) = slot.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return SchemaResult {
                        tables: cached.schema.tables.clone(),
                        error: None,
                    };
                }
            }
        }

        match self.fetcher.fetch_schema().await {
            Ok(schema) => {
                debug!(tables = schema.tables.len(), "Schema refreshed");
                let tables = schema.tables.clone();
                let mut slot = self.slot.write().await;
                *slot = Some(CachedSchema {
                    schema,
                    fetched_at: Instant::now(),
                });
                SchemaResult {
                    tables,
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, "Schema fetch failed; not caching");
                SchemaResult {
                    tables: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::airtable::FieldSchema;

    struct CountingFetcher {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl CountingFetcher {
        fn new(fail_first: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_first,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SchemaFetcher for CountingFetcher {
        async fn fetch_schema(&self) -> anyhow::Result<SimplifiedSchema> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("Metadata API: 503 unavailable");
            }
            Ok(SimplifiedSchema {
                tables: vec![TableSchema {
                    table_name: "Clients".into(),
                    fields: vec![FieldSchema {
                        name: "Nom".into(),
                        field_type: "singleLineText".into(),
                        options: None,
                    }],
                }],
            })
        }
    }

    #[tokio::test]
    async fn fresh_entry_served_without_refetch() {
        let fetcher = Arc::new(CountingFetcher::new(0));
        let cache = SchemaCache::new(fetcher.clone(), Duration::from_secs(300));

        let first = cache.get().await;
        assert_eq!(first.tables.len(), 1);
        assert!(first.error.is_none());

        let second = cache.get().await;
        assert_eq!(second.tables.len(), 1);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn expired_entry_refetched() {
        let fetcher = Arc::new(CountingFetcher::new(0));
        let cache = SchemaCache::new(fetcher.clone(), Duration::ZERO);

        cache.get().await;
        cache.get().await;
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn failure_not_cached() {
        let fetcher = Arc::new(CountingFetcher::new(1));
        let cache = SchemaCache::new(fetcher.clone(), Duration::from_secs(300));

        let failed = cache.get().await;
        assert!(failed.tables.is_empty());
        assert!(failed.error.unwrap().contains("503"));

        // Next lookup retries immediately instead of serving the failure.
        let ok = cache.get().await;
        assert!(ok.error.is_none());
        assert_eq!(ok.tables.len(), 1);
        assert_eq!(fetcher.calls(), 2);
    }
}
