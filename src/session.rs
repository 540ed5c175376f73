//! Query-time retrieval composition.
//!
//! For each conversational turn a [`RetrievalSession`] queries the chunk
//! store with tunable parameters: top-K, a similarity floor, a latency
//! budget, and optional hypothetical-document expansion (a second search
//! pass seeded by a model-generated hypothetical answer, merged with the
//! direct pass). Exceeding the budget degrades to whatever the first pass
//! produced — retrieval never blocks a turn indefinitely.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::llm::CompletionService;
use crate::store::{ChunkMatch, ChunkingStore};

/// Tunable retrieval parameters for one session.
#[derive(Debug, Clone)]
pub struct RagOptions {
    pub top_k: usize,
    pub similarity_threshold: f64,
    pub max_wait: Duration,
    pub hyde: bool,
    /// Restrict results to documents whose title or URI mentions this
    /// entity.
    pub entity_scope: Option<String>,
}

impl RagOptions {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            top_k: config.top_k,
            similarity_threshold: config.similarity_threshold,
            max_wait: Duration::from_millis(config.max_wait_millis),
            hyde: config.hyde,
            entity_scope: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_hyde(mut self, hyde: bool) -> Self {
        self.hyde = hyde;
        self
    }

    pub fn with_entity_scope(mut self, entity: impl Into<String>) -> Self {
        self.entity_scope = Some(entity.into());
        self
    }
}

impl Default for RagOptions {
    fn default() -> Self {
        Self {
            top_k: 8,
            similarity_threshold: 0.0,
            max_wait: Duration::from_secs(5),
            hyde: false,
            entity_scope: None,
        }
    }
}

pub struct RetrievalSession {
    store: ChunkingStore,
    options: RagOptions,
    completion: Option<Arc<dyn CompletionService>>,
}

impl RetrievalSession {
    pub fn new(store: ChunkingStore, options: RagOptions) -> Self {
        Self {
            store,
            options,
            completion: None,
        }
    }

    /// Attach the completion service that powers query rewriting.
    pub fn with_completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn options(&self) -> &RagOptions {
        &self.options
    }

    /// Retrieve context chunks for a question, within the latency budget.
    pub async fn retrieve(&self, question: &str) -> Result<Vec<ChunkMatch>> {
        let started = Instant::now();
        let budget = self.options.max_wait;

        let mut matches = match timeout(
            budget,
            self.store.search(question, self.options.top_k),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!("retrieval budget exhausted before first pass completed");
                return Ok(Vec::new());
            }
        };

        if self.options.hyde {
            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                debug!("no budget left for expansion pass");
            } else {
                match timeout(remaining, self.expansion_pass(question)).await {
                    Ok(Ok(second)) => merge_matches(&mut matches, second),
                    Ok(Err(e)) => {
                        warn!(error = %e, "expansion pass failed, using direct results")
                    }
                    Err(_) => {
                        debug!("budget exceeded during expansion, using direct results")
                    }
                }
            }
        }

        if let Some(entity) = &self.options.entity_scope {
            let needle = entity.to_lowercase();
            matches.retain(|m| {
                m.document_title.to_lowercase().contains(&needle)
                    || m.document_uri.to_lowercase().contains(&needle)
            });
        }
        matches.retain(|m| m.score >= self.options.similarity_threshold);
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(self.options.top_k);

        Ok(matches)
    }

    /// Hypothetical-document expansion: ask the model what an answer might
    /// look like, then search with that text to catch vocabulary the
    /// question itself lacks.
    async fn expansion_pass(&self, question: &str) -> Result<Vec<ChunkMatch>> {
        let Some(completion) = &self.completion else {
            return Ok(Vec::new());
        };

        let hypothetical = completion
            .complete(
                question,
                "Write a short, plausible documentation paragraph that would \
                 answer the user's question. Do not say you are unsure.",
            )
            .await?;

        self.store
            .search(&hypothetical, self.options.top_k)
            .await
    }
}

/// Merge a second result set into the first, keeping the best score per
/// chunk id.
fn merge_matches(base: &mut Vec<ChunkMatch>, extra: Vec<ChunkMatch>) {
    let seen: HashSet<String> = base.iter().map(|m| m.chunk_id.clone()).collect();
    for m in extra {
        if !seen.contains(&m.chunk_id) {
            base.push(m);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, DocFormat};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct CannedCompletion(String);

    #[async_trait]
    impl CompletionService for CannedCompletion {
        async fn complete(&self, _prompt: &str, _context: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    struct SlowCompletion;

    #[async_trait]
    impl CompletionService for SlowCompletion {
        async fn complete(&self, _prompt: &str, _context: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(String::new())
        }
    }

    async fn seeded_store(tmp: &TempDir) -> ChunkingStore {
        let store = ChunkingStore::open(&tmp.path().join("docent.sqlite"), 2800)
            .await
            .unwrap();
        store.provision().await.unwrap();
        for (uri, body) in [
            (
                "file:///deploy.md",
                "# Deploy\n\nDeployment happens through the release pipeline.",
            ),
            (
                "file:///rollback.md",
                "# Rollback\n\nRollbacks reuse the previous pipeline artifact.",
            ),
        ] {
            let tree = parse("doc", uri, body, DocFormat::Markdown).unwrap();
            store.write_and_chunk_document(&tree).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn direct_retrieval_respects_top_k() {
        let tmp = TempDir::new().unwrap();
        let store = seeded_store(&tmp).await;
        let session = RetrievalSession::new(store, RagOptions::default().with_top_k(1));

        let matches = session.retrieve("pipeline").await.unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn threshold_filters_weak_matches() {
        let tmp = TempDir::new().unwrap();
        let store = seeded_store(&tmp).await;
        let session = RetrievalSession::new(
            store,
            RagOptions::default().with_similarity_threshold(1.0),
        );

        // Only the single best-normalized match (score exactly 1.0) survives.
        let matches = session.retrieve("pipeline").await.unwrap();
        assert!(matches.iter().all(|m| (m.score - 1.0).abs() < 1e-9));
    }

    #[tokio::test]
    async fn expansion_pass_widens_recall() {
        let tmp = TempDir::new().unwrap();
        let store = seeded_store(&tmp).await;
        // The question shares no vocabulary with the rollback doc; the
        // hypothetical answer does.
        let session = RetrievalSession::new(store, RagOptions::default().with_hyde(true))
            .with_completion(Arc::new(CannedCompletion(
                "Rollbacks reuse the previous artifact.".to_string(),
            )));

        let matches = session.retrieve("undo a bad prod push").await.unwrap();
        assert!(matches
            .iter()
            .any(|m| m.document_uri == "file:///rollback.md"));
    }

    #[tokio::test]
    async fn entity_scope_narrows_results() {
        let tmp = TempDir::new().unwrap();
        let store = seeded_store(&tmp).await;
        let session = RetrievalSession::new(
            store,
            RagOptions::default().with_entity_scope("rollback"),
        );

        // Both documents mention "pipeline"; scope keeps only the rollback doc.
        let matches = session.retrieve("pipeline").await.unwrap();
        assert!(!matches.is_empty());
        assert!(matches
            .iter()
            .all(|m| m.document_uri == "file:///rollback.md"));
    }

    #[tokio::test]
    async fn slow_expansion_degrades_to_first_pass() {
        let tmp = TempDir::new().unwrap();
        let store = seeded_store(&tmp).await;
        let session = RetrievalSession::new(
            store,
            RagOptions::default()
                .with_hyde(true)
                .with_max_wait(Duration::from_millis(300)),
        )
        .with_completion(Arc::new(SlowCompletion));

        let started = Instant::now();
        let matches = session.retrieve("deployment").await.unwrap();
        // First-pass results survive; the stalled expansion was abandoned.
        assert!(!matches.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
