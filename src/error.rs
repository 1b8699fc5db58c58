//! Error taxonomy for the ingestion → retrieval → generation pipeline.
//!
//! Provider internals (embedding, vector index, language models) return
//! `anyhow::Result`; the registry and generators fold those into the typed
//! variants below so the HTTP layer can map each kind to a status code.

use thiserror::Error;

/// Result type alias using the pipeline [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline error kinds.
#[derive(Error, Debug)]
pub enum Error {
    /// No files were uploaded, or none of them yielded usable text.
    #[error("upload rejected: {0}")]
    Upload(String),

    /// The knowledge base id is unknown to this process.
    #[error("knowledge base not found: {kb_id}")]
    NotFound { kb_id: String },

    /// The embedding backend failed or returned a malformed response.
    #[error("embedding backend error: {0}")]
    Embedding(String),

    /// The vector index rejected the write or the query failed.
    #[error("vector index error: {0}")]
    Index(String),

    /// The test-case model did not return a JSON list.
    #[error("failed to parse model output as a test-case list: {0}")]
    GenerationParse(String),

    /// The language model call itself failed.
    #[error("language model error: {0}")]
    Model(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(kb_id: impl Into<String>) -> Self {
        Error::NotFound {
            kb_id: kb_id.into(),
        }
    }
}
