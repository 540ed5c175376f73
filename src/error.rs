//! Typed failure taxonomy for the ingestion pipeline.
//!
//! Every per-item failure during a batch run is converted into structured
//! data (`IngestionFailure`) at the orchestrator boundary — these errors
//! never propagate past it and never abort a batch.

use thiserror::Error;

/// A failure affecting a single source or document during ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    /// A single document or page could not be parsed.
    #[error("parse error for {source_id}: {reason}")]
    Parse { source_id: String, reason: String },

    /// A URL could not be fetched.
    #[error("fetch error for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Persisting a document's chunks failed. The store guarantees the
    /// document was not left partially committed.
    #[error("store write error for {uri}: {reason}")]
    StoreWrite { uri: String, reason: String },
}

impl IngestError {
    pub fn parse(source_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            source_id: source_id.into(),
            reason: reason.into(),
        }
    }

    pub fn fetch(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn store_write(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StoreWrite {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}
