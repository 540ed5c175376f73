//! The chunk store — the sole write path into the knowledge base.
//!
//! SQLite-backed. Documents are written transactionally: a re-ingested
//! document's old chunks are deleted and its new chunks inserted inside a
//! single transaction, so readers see either the complete old document or
//! the complete new one, never a half-written state.
//!
//! Retrieval uses an FTS5 index over chunk text ranked by bm25, min-max
//! normalized to [0, 1] so callers can apply a similarity threshold.

use anyhow::Result;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{debug, info};

use crate::chunk::{chunk_tree, Chunk};
use crate::content::ContentTree;
use crate::error::IngestError;

/// Current store counts, read-consistent with the latest committed write.
#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreInfo {
    pub document_count: i64,
    pub chunk_count: i64,
    /// Documents + sections + chunks.
    pub content_element_count: i64,
}

/// A scored chunk returned from [`ChunkingStore::search`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChunkMatch {
    pub chunk_id: String,
    pub document_uri: String,
    pub document_title: String,
    pub text: String,
    /// Normalized to [0, 1]; 1 is the best match in the result set.
    pub score: f64,
}

#[derive(Clone)]
pub struct ChunkingStore {
    pool: SqlitePool,
    max_chars: usize,
}

impl ChunkingStore {
    pub async fn open(db_path: &Path, max_chars: usize) -> Result<Self> {
        let pool = crate::db::connect(db_path).await?;
        Ok(Self { pool, max_chars })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Idempotent schema/index creation. Safe to call repeatedly; never
    /// destroys existing data.
    pub async fn provision(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                uri TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                source_id TEXT NOT NULL,
                section_count INTEGER NOT NULL DEFAULT 0,
                ingested_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_uri TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                hash TEXT NOT NULL,
                UNIQUE(document_uri, chunk_index),
                FOREIGN KEY (document_uri) REFERENCES documents(uri)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // FTS5 CREATE is not idempotent natively, so check first
        let fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
        )
        .fetch_one(&self.pool)
        .await?;

        if !fts_exists {
            sqlx::query(
                r#"
                CREATE VIRTUAL TABLE chunks_fts USING fts5(
                    chunk_id UNINDEXED,
                    document_uri UNINDEXED,
                    text
                )
                "#,
            )
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_document_uri ON chunks(document_uri)",
        )
        .execute(&self.pool)
        .await?;

        info!("store provisioned");
        Ok(())
    }

    /// Chunk a parsed tree and persist it. All of the document's chunks
    /// become visible in one transaction; a prior version of the same
    /// document is replaced in the same transaction.
    pub async fn write_and_chunk_document(&self, tree: &ContentTree) -> Result<(), IngestError> {
        let uri = tree.source_uri.clone();
        let chunks = chunk_tree(tree, self.max_chars);
        let section_count = tree.section_count() as i64;

        self.replace_document(tree, &chunks, section_count)
            .await
            .map_err(|e| IngestError::store_write(&uri, e.to_string()))?;

        debug!(uri = %uri, chunks = chunks.len(), "document written");
        Ok(())
    }

    async fn replace_document(
        &self,
        tree: &ContentTree,
        chunks: &[Chunk],
        section_count: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO documents (uri, title, source_id, section_count, ingested_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(uri) DO UPDATE SET
                title = excluded.title,
                source_id = excluded.source_id,
                section_count = excluded.section_count,
                ingested_at = excluded.ingested_at
            "#,
        )
        .bind(&tree.source_uri)
        .bind(tree.title())
        .bind(&tree.root.id)
        .bind(section_count)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks_fts WHERE document_uri = ?")
            .bind(&tree.source_uri)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_uri = ?")
            .bind(&tree.source_uri)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, document_uri, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_uri)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, document_uri, text) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(&chunk.document_uri)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn contains_document(&self, uri: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE uri = ?")
            .bind(uri)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Delete a document and all its chunks. Returns the number of chunks
    /// removed, or `None` if the document was not present.
    pub async fn delete_document(&self, uri: &str) -> Result<Option<i64>> {
        if !self.contains_document(uri).await? {
            return Ok(None);
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks_fts WHERE document_uri = ?")
            .bind(uri)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM chunks WHERE document_uri = ?")
            .bind(uri)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM documents WHERE uri = ?")
            .bind(uri)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(uri = %uri, chunks = deleted, "document deleted");
        Ok(Some(deleted as i64))
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn info(&self) -> Result<StoreInfo> {
        let document_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let section_count: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(section_count), 0) FROM documents")
                .fetch_one(&self.pool)
                .await?;

        Ok(StoreInfo {
            document_count,
            chunk_count,
            content_element_count: document_count + section_count + chunk_count,
        })
    }

    /// Keyword search over chunk text. bm25 ranks are negated and min-max
    /// normalized so the best match scores 1.0.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ChunkMatch>> {
        let fts = fts_query(query);
        if fts.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT chunks_fts.chunk_id, chunks_fts.document_uri, chunks_fts.text,
                   rank, d.title
            FROM chunks_fts
            JOIN documents d ON d.uri = chunks_fts.document_uri
            WHERE chunks_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(&fts)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await?;

        let raw: Vec<(String, String, String, String, f64)> = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                (
                    row.get("chunk_id"),
                    row.get("document_uri"),
                    row.get("title"),
                    row.get("text"),
                    -rank, // negate so higher = better
                )
            })
            .collect();

        let s_min = raw.iter().map(|r| r.4).fold(f64::INFINITY, f64::min);
        let s_max = raw.iter().map(|r| r.4).fold(f64::NEG_INFINITY, f64::max);

        Ok(raw
            .into_iter()
            .map(|(chunk_id, document_uri, document_title, text, score)| {
                let norm = if (s_max - s_min).abs() < f64::EPSILON {
                    1.0
                } else {
                    (score - s_min) / (s_max - s_min)
                };
                ChunkMatch {
                    chunk_id,
                    document_uri,
                    document_title,
                    text,
                    score: norm,
                }
            })
            .collect())
    }
}

/// Reduce free-form input (chat questions included) to a safe FTS5 MATCH
/// expression: bare alphanumeric terms OR-ed together.
fn fts_query(input: &str) -> String {
    let terms: Vec<String> = input
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();
    terms.join(" OR ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, DocFormat};
    use tempfile::TempDir;

    async fn scratch_store() -> (TempDir, ChunkingStore) {
        let tmp = TempDir::new().unwrap();
        let store = ChunkingStore::open(&tmp.path().join("docent.sqlite"), 2800)
            .await
            .unwrap();
        store.provision().await.unwrap();
        (tmp, store)
    }

    fn doc(uri: &str, body: &str) -> ContentTree {
        parse("doc.md", uri, body, DocFormat::Markdown).unwrap()
    }

    #[test]
    fn fts_query_strips_match_syntax() {
        assert_eq!(
            fts_query("how do I configure auth?"),
            "\"how\" OR \"do\" OR \"I\" OR \"configure\" OR \"auth\""
        );
        assert_eq!(fts_query("?!. -"), "");
    }

    #[tokio::test]
    async fn provision_is_idempotent_and_preserves_data() {
        let (_tmp, store) = scratch_store().await;
        store
            .write_and_chunk_document(&doc("file:///a.md", "# A\n\nSome text."))
            .await
            .unwrap();
        let before = store.count().await.unwrap();

        store.provision().await.unwrap();
        store.provision().await.unwrap();

        assert_eq!(store.count().await.unwrap(), before);
    }

    #[tokio::test]
    async fn rewrite_replaces_chunks_not_duplicates() {
        let (_tmp, store) = scratch_store().await;
        let uri = "file:///a.md";
        store
            .write_and_chunk_document(&doc(uri, "# A\n\nFirst version."))
            .await
            .unwrap();
        let first = store.count().await.unwrap();

        store
            .write_and_chunk_document(&doc(uri, "# A\n\nSecond version."))
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), first);

        let hits = store.search("second version", 5).await.unwrap();
        assert!(!hits.is_empty());
        let stale = store.search("first", 5).await.unwrap();
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn info_counts_documents_sections_chunks() {
        let (_tmp, store) = scratch_store().await;
        store
            .write_and_chunk_document(&doc(
                "file:///a.md",
                "# A\n\nIntro.\n\n## One\n\nText one.\n\n## Two\n\nText two.",
            ))
            .await
            .unwrap();

        let info = store.info().await.unwrap();
        assert_eq!(info.document_count, 1);
        assert_eq!(info.chunk_count, 3);
        assert_eq!(info.content_element_count, 1 + 2 + 3);
    }

    #[tokio::test]
    async fn delete_document_removes_everything() {
        let (_tmp, store) = scratch_store().await;
        let uri = "file:///a.md";
        store
            .write_and_chunk_document(&doc(uri, "# A\n\nDisposable text."))
            .await
            .unwrap();

        let deleted = store.delete_document(uri).await.unwrap();
        assert_eq!(deleted, Some(1));
        assert!(!store.contains_document(uri).await.unwrap());
        assert!(store.search("disposable", 5).await.unwrap().is_empty());

        assert_eq!(store.delete_document(uri).await.unwrap(), None);
    }

    #[tokio::test]
    async fn search_scores_normalized_and_ranked() {
        let (_tmp, store) = scratch_store().await;
        store
            .write_and_chunk_document(&doc(
                "file:///a.md",
                "# Deploy\n\nDeployment uses containers. Deployment is automated.",
            ))
            .await
            .unwrap();
        store
            .write_and_chunk_document(&doc(
                "file:///b.md",
                "# Other\n\nNothing relevant here at all.",
            ))
            .await
            .unwrap();

        let hits = store.search("deployment", 5).await.unwrap();
        assert!(!hits.is_empty());
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert_eq!(hits[0].document_uri, "file:///a.md");
        for hit in &hits {
            assert!((0.0..=1.0).contains(&hit.score));
        }
    }
}
