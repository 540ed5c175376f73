//! Per-URI refresh policy.
//!
//! Decides whether a URL needs (re-)ingestion. URIs matching a volatile
//! pattern (by default `-SNAPSHOT`) are always re-fetched and their prior
//! chunks replaced; anything else is ingested once and skipped on later
//! runs, so re-running ingestion over unchanged static sources creates no
//! duplicate chunks and costs no network or parse time.

use tracing::{debug, info};

use crate::content::ContentTree;
use crate::error::IngestError;
use crate::fetch::Fetcher;
use crate::parser::{self, DocFormat};
use crate::store::ChunkingStore;

pub struct RefreshPolicy {
    volatile_patterns: Vec<String>,
}

impl RefreshPolicy {
    /// Policy that treats URIs containing any of `patterns` as volatile.
    pub fn containing_any(patterns: Vec<String>) -> Self {
        Self {
            volatile_patterns: patterns,
        }
    }

    /// Pure substring test over the URI, evaluated fresh on every call.
    pub fn is_volatile(&self, uri: &str) -> bool {
        self.volatile_patterns.iter().any(|p| uri.contains(p))
    }

    /// Fetch, parse, and store the page at `uri` if the policy requires it.
    ///
    /// Returns the parsed tree when ingestion happened, `None` when the URI
    /// was already present and non-volatile.
    pub async fn ingest_uri_if_needed(
        &self,
        store: &ChunkingStore,
        fetcher: &dyn Fetcher,
        uri: &str,
    ) -> Result<Option<ContentTree>, IngestError> {
        if self.is_volatile(uri) {
            debug!(uri = %uri, "volatile source, refreshing");
            if store
                .delete_document(uri)
                .await
                .map_err(|e| IngestError::store_write(uri, e.to_string()))?
                .is_some()
            {
                info!(uri = %uri, "replaced prior snapshot content");
            }
        } else if store
            .contains_document(uri)
            .await
            .map_err(|e| IngestError::store_write(uri, e.to_string()))?
        {
            debug!(uri = %uri, "already ingested, skipping");
            return Ok(None);
        }

        let page = fetcher.fetch(uri).await?;
        let format = DocFormat::from_content_type(&page.content_type);
        let tree = parser::parse(uri, uri, &page.body, format)?;
        store.write_and_chunk_document(&tree).await?;

        Ok(Some(tree))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchedPage;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingFetcher {
        body: String,
        calls: AtomicUsize,
    }

    impl CountingFetcher {
        fn new(body: &str) -> Self {
            Self {
                body: body.to_string(),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch(&self, _url: &str) -> Result<FetchedPage, IngestError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchedPage {
                body: self.body.clone(),
                content_type: "text/markdown".to_string(),
            })
        }
    }

    struct FailingFetcher;

    #[async_trait]
    impl Fetcher for FailingFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, IngestError> {
            Err(IngestError::fetch(url, "connection refused"))
        }
    }

    async fn scratch_store() -> (TempDir, ChunkingStore) {
        let tmp = TempDir::new().unwrap();
        let store = ChunkingStore::open(&tmp.path().join("docent.sqlite"), 2800)
            .await
            .unwrap();
        store.provision().await.unwrap();
        (tmp, store)
    }

    fn default_policy() -> RefreshPolicy {
        RefreshPolicy::containing_any(vec!["-SNAPSHOT".to_string()])
    }

    #[test]
    fn volatile_classification_is_a_substring_test() {
        let policy = default_policy();
        assert!(policy.is_volatile("https://docs.example.com/1.2-SNAPSHOT/index.html"));
        assert!(!policy.is_volatile("https://docs.example.com/1.2/index.html"));
    }

    #[tokio::test]
    async fn static_uri_ingested_once() {
        let (_tmp, store) = scratch_store().await;
        let policy = default_policy();
        let fetcher = CountingFetcher::new("# Page\n\nStable content.");
        let uri = "https://docs.example.com/guide";

        let first = policy
            .ingest_uri_if_needed(&store, &fetcher, uri)
            .await
            .unwrap();
        assert!(first.is_some());
        let count_after_first = store.count().await.unwrap();

        let second = policy
            .ingest_uri_if_needed(&store, &fetcher, uri)
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(store.count().await.unwrap(), count_after_first);
        // Skip means no second fetch either.
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn volatile_uri_always_refreshed() {
        let (_tmp, store) = scratch_store().await;
        let policy = default_policy();
        let fetcher = CountingFetcher::new("# Page\n\nSnapshot content.");
        let uri = "https://docs.example.com/2.0-SNAPSHOT/guide";

        policy
            .ingest_uri_if_needed(&store, &fetcher, uri)
            .await
            .unwrap();
        let count_after_first = store.count().await.unwrap();

        let second = policy
            .ingest_uri_if_needed(&store, &fetcher, uri)
            .await
            .unwrap();
        assert!(second.is_some());
        assert_eq!(fetcher.calls(), 2);
        // Replaced, not duplicated.
        assert_eq!(store.count().await.unwrap(), count_after_first);
    }

    #[tokio::test]
    async fn fetch_failure_propagates_as_ingest_error() {
        let (_tmp, store) = scratch_store().await;
        let policy = default_policy();

        let err = policy
            .ingest_uri_if_needed(&store, &FailingFetcher, "https://down.example.com")
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Fetch { .. }));
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
