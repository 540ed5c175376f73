//! Ingestion orchestration.
//!
//! Walks the configured URL and directory lists, driving the refresh
//! policy, parser, and store per source. Failure isolation is two-level:
//! one URL or one directory failing never halts the batch, and one bad
//! document inside a directory never prevents its siblings from being
//! ingested (the directory is still reported as ingested, with its
//! document failures listed separately).

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::{resolve_path_here, Config};
use crate::error::IngestError;
use crate::fetch::Fetcher;
use crate::parser::{self, DirectoryParsingConfig};
use crate::refresh::RefreshPolicy;
use crate::store::ChunkingStore;

/// The identity of a failed ingestion item together with a human-readable
/// reason, so operators can diagnose problems from the summary alone.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct IngestionFailure {
    /// The URL, directory, or document path that failed.
    pub source: String,
    pub reason: String,
}

impl IngestionFailure {
    pub fn new(source: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            source: source.into(),
            // Reason must never be blank in operator output.
            reason: if reason.trim().is_empty() {
                "unknown error".to_string()
            } else {
                reason
            },
        }
    }

    pub fn from_error(source: impl Into<String>, err: &IngestError) -> Self {
        Self::new(source, err.to_string())
    }
}

/// Structured result of a full ingestion run (URLs + directories).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionResult {
    pub loaded_urls: Vec<String>,
    pub failed_urls: Vec<IngestionFailure>,
    pub ingested_directories: Vec<String>,
    pub failed_directories: Vec<IngestionFailure>,
    /// Per-document failures inside otherwise-successful directories.
    pub failed_documents: Vec<IngestionFailure>,
    #[serde(rename = "elapsedSeconds", serialize_with = "duration_secs")]
    pub elapsed: Duration,
}

fn duration_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl IngestionResult {
    pub fn total_urls(&self) -> usize {
        self.loaded_urls.len() + self.failed_urls.len()
    }

    pub fn total_directories(&self) -> usize {
        self.ingested_directories.len() + self.failed_directories.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_urls.is_empty()
            || !self.failed_directories.is_empty()
            || !self.failed_documents.is_empty()
    }

    pub fn total_failures(&self) -> usize {
        self.failed_urls.len() + self.failed_directories.len() + self.failed_documents.len()
    }
}

/// Outcome of ingesting a single directory.
#[derive(Debug)]
pub struct DirectoryIngestion {
    pub ingested_documents: usize,
    pub document_failures: Vec<IngestionFailure>,
}

/// Central coordinator for batch ingestion.
pub struct IngestionOrchestrator {
    store: ChunkingStore,
    policy: RefreshPolicy,
    fetcher: Arc<dyn Fetcher>,
    urls: Vec<String>,
    directories: Vec<String>,
    parsing: DirectoryParsingConfig,
}

impl IngestionOrchestrator {
    pub fn new(
        store: ChunkingStore,
        policy: RefreshPolicy,
        fetcher: Arc<dyn Fetcher>,
        urls: Vec<String>,
        directories: Vec<String>,
    ) -> Self {
        Self {
            store,
            policy,
            fetcher,
            urls,
            directories,
            parsing: DirectoryParsingConfig::default(),
        }
    }

    pub fn from_config(store: ChunkingStore, fetcher: Arc<dyn Fetcher>, config: &Config) -> Self {
        Self::new(
            store,
            RefreshPolicy::containing_any(config.refresh.volatile_patterns.clone()),
            fetcher,
            config.content.urls.clone(),
            config.content.directories.clone(),
        )
    }

    pub fn store(&self) -> &ChunkingStore {
        &self.store
    }

    /// Ingest the page at `url`, honoring the refresh policy.
    pub async fn ingest_page(&self, url: &str) -> Result<(), IngestError> {
        match self
            .policy
            .ingest_uri_if_needed(&self.store, self.fetcher.as_ref(), url)
            .await?
        {
            Some(tree) => {
                info!(
                    url = %url,
                    title = %tree.title(),
                    sections = tree.section_count(),
                    "ingested page"
                );
            }
            None => {
                info!(url = %url, "page already ingested, skipping");
            }
        }
        Ok(())
    }

    /// Ingest every parseable document under `dir`. A single document's
    /// failure (parse or store write) is recorded and its siblings proceed.
    pub async fn ingest_directory(&self, dir: &Path) -> Result<DirectoryIngestion, IngestError> {
        let parsed = parser::parse_from_directory(dir, &self.parsing)?;

        let mut document_failures = parsed.failures;
        let mut ingested_documents = 0usize;

        for root in &parsed.content_roots {
            match self.store.write_and_chunk_document(root).await {
                Ok(()) => {
                    info!(
                        uri = %root.source_uri,
                        sections = root.section_count(),
                        "document ingested"
                    );
                    ingested_documents += 1;
                }
                Err(e) => {
                    warn!(uri = %root.source_uri, error = %e, "document write failed");
                    document_failures
                        .push(IngestionFailure::from_error(root.source_uri.as_str(), &e));
                }
            }
        }

        Ok(DirectoryIngestion {
            ingested_documents,
            document_failures,
        })
    }

    /// Run the full batch: all configured URLs, then all configured
    /// directories. Never returns an error — every failure is captured in
    /// the result.
    pub async fn load_references(&self) -> IngestionResult {
        let started = Instant::now();

        let mut loaded_urls = Vec::new();
        let mut failed_urls = Vec::new();
        for url in &self.urls {
            info!(url = %url, "loading URL");
            match self.ingest_page(url).await {
                Ok(()) => loaded_urls.push(url.clone()),
                Err(e) => {
                    error!(url = %url, error = %e, "failed to load URL");
                    failed_urls.push(IngestionFailure::from_error(url.as_str(), &e));
                }
            }
        }

        let mut ingested_directories = Vec::new();
        let mut failed_directories = Vec::new();
        let mut failed_documents = Vec::new();
        for dir in &self.directories {
            let resolved = resolve_path_here(dir);
            info!(directory = %resolved.display(), "ingesting directory");
            match self.ingest_directory(&resolved).await {
                Ok(outcome) => {
                    ingested_directories.push(resolved.display().to_string());
                    failed_documents.extend(outcome.document_failures);
                }
                Err(e) => {
                    error!(directory = %resolved.display(), error = %e, "directory failed");
                    failed_directories
                        .push(IngestionFailure::from_error(resolved.display().to_string(), &e));
                }
            }
        }

        let result = IngestionResult {
            loaded_urls,
            failed_urls,
            ingested_directories,
            failed_directories,
            failed_documents,
            elapsed: started.elapsed(),
        };

        info!(
            urls = result.total_urls(),
            url_failures = result.failed_urls.len(),
            directories = result.total_directories(),
            document_failures = result.failed_documents.len(),
            elapsed_secs = result.elapsed.as_secs(),
            "ingestion run complete"
        );

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchedPage;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn failure(source: &str) -> IngestionFailure {
        IngestionFailure::new(source, "test error")
    }

    fn empty_result() -> IngestionResult {
        IngestionResult {
            loaded_urls: vec![],
            failed_urls: vec![],
            ingested_directories: vec![],
            failed_directories: vec![],
            failed_documents: vec![],
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn total_urls_sums_loaded_and_failed() {
        let mut result = empty_result();
        result.loaded_urls = vec!["a".into(), "b".into()];
        result.failed_urls = vec![failure("c")];
        assert_eq!(result.total_urls(), 3);
    }

    #[test]
    fn total_directories_sums_ingested_and_failed() {
        let mut result = empty_result();
        result.ingested_directories = vec!["d1".into()];
        result.failed_directories = vec![failure("d2"), failure("d3")];
        assert_eq!(result.total_directories(), 3);
    }

    #[test]
    fn has_failures_covers_all_three_lists() {
        let mut with_url = empty_result();
        with_url.failed_urls = vec![failure("u")];
        assert!(with_url.has_failures());

        let mut with_dir = empty_result();
        with_dir.failed_directories = vec![failure("d")];
        assert!(with_dir.has_failures());

        let mut with_doc = empty_result();
        with_doc.failed_documents = vec![failure("doc")];
        assert!(with_doc.has_failures());

        assert!(!empty_result().has_failures());
    }

    #[test]
    fn total_failures_counts_all_types() {
        let mut result = empty_result();
        result.failed_urls = vec![failure("u1"), failure("u2")];
        result.failed_directories = vec![failure("d1")];
        result.failed_documents = vec![failure("doc1"), failure("doc2"), failure("doc3")];
        assert_eq!(result.total_failures(), 6);
    }

    #[test]
    fn blank_reason_replaced() {
        let f = IngestionFailure::new("src", "   ");
        assert_eq!(f.reason, "unknown error");
    }

    #[test]
    fn result_serializes_with_camel_case_and_seconds() {
        let mut result = empty_result();
        result.loaded_urls = vec!["http://a".into()];
        result.failed_urls = vec![failure("http://b")];
        result.elapsed = Duration::from_millis(1500);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["loadedUrls"][0], "http://a");
        assert_eq!(json["failedUrls"][0]["source"], "http://b");
        assert!((json["elapsedSeconds"].as_f64().unwrap() - 1.5).abs() < 1e-9);
    }

    // ============ Orchestrator behavior ============

    struct MapFetcher {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl Fetcher for MapFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, IngestError> {
            match self.pages.get(url) {
                Some(body) => Ok(FetchedPage {
                    body: body.clone(),
                    content_type: "text/markdown".to_string(),
                }),
                None => Err(IngestError::fetch(url, "connection refused")),
            }
        }
    }

    async fn scratch_store(tmp: &TempDir) -> ChunkingStore {
        let store = ChunkingStore::open(&tmp.path().join("docent.sqlite"), 2800)
            .await
            .unwrap();
        store.provision().await.unwrap();
        store
    }

    fn orchestrator(
        store: ChunkingStore,
        pages: &[(&str, &str)],
        urls: Vec<String>,
        directories: Vec<String>,
    ) -> IngestionOrchestrator {
        let pages = pages
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        IngestionOrchestrator::new(
            store,
            RefreshPolicy::containing_any(vec!["-SNAPSHOT".to_string()]),
            Arc::new(MapFetcher { pages }),
            urls,
            directories,
        )
    }

    #[tokio::test]
    async fn one_unreachable_url_never_halts_the_batch() {
        let tmp = TempDir::new().unwrap();
        let store = scratch_store(&tmp).await;
        let orch = orchestrator(
            store,
            &[
                ("http://a.example/doc", "# A\n\nAlpha."),
                ("http://c.example/doc", "# C\n\nGamma."),
            ],
            vec![
                "http://a.example/doc".into(),
                "http://b.example/doc".into(),
                "http://c.example/doc".into(),
            ],
            vec![],
        );

        let result = orch.load_references().await;
        assert_eq!(result.loaded_urls.len(), 2);
        assert_eq!(result.failed_urls.len(), 1);
        assert_eq!(result.failed_urls[0].source, "http://b.example/doc");
        assert!(!result.failed_urls[0].reason.trim().is_empty());
        assert_eq!(result.total_urls(), 3);
    }

    #[tokio::test]
    async fn corrupt_document_isolated_within_directory() {
        let tmp = TempDir::new().unwrap();
        let store = scratch_store(&tmp).await;

        let docs = TempDir::new().unwrap();
        std::fs::write(docs.path().join("one.md"), "# One\n\nFine.").unwrap();
        std::fs::write(docs.path().join("two.md"), "# Two\n\nAlso fine.").unwrap();
        std::fs::write(docs.path().join("corrupt.md"), [0xff, 0xfe, 0x00]).unwrap();

        let orch = orchestrator(
            store,
            &[],
            vec![],
            vec![docs.path().display().to_string()],
        );

        let result = orch.load_references().await;
        // The directory is still reported as ingested.
        assert_eq!(result.ingested_directories.len(), 1);
        assert!(result.failed_directories.is_empty());
        assert_eq!(result.failed_documents.len(), 1);
        assert!(result.failed_documents[0].source.contains("corrupt.md"));

        let info = orch.store().info().await.unwrap();
        assert_eq!(info.document_count, 2);
    }

    #[tokio::test]
    async fn missing_directory_is_a_directory_failure() {
        let tmp = TempDir::new().unwrap();
        let store = scratch_store(&tmp).await;
        let orch = orchestrator(store, &[], vec![], vec!["/no/such/dir".into()]);

        let result = orch.load_references().await;
        assert!(result.ingested_directories.is_empty());
        assert_eq!(result.failed_directories.len(), 1);
        assert_eq!(result.total_directories(), 1);
        assert!(result.has_failures());
    }

    #[tokio::test]
    async fn reloading_static_urls_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = scratch_store(&tmp).await;
        let orch = orchestrator(
            store,
            &[("http://a.example/doc", "# A\n\nAlpha content.")],
            vec!["http://a.example/doc".into()],
            vec![],
        );

        orch.load_references().await;
        let first = orch.store().count().await.unwrap();
        let second_run = orch.load_references().await;
        assert_eq!(orch.store().count().await.unwrap(), first);
        // The skip still counts as loaded.
        assert_eq!(second_run.loaded_urls.len(), 1);
    }
}
