//! Similarity retrieval scoped to one knowledge base.

use std::sync::Arc;

use tracing::debug;

use crate::chunk::content_hash;
use crate::error::{Error, Result};
use crate::models::{Chunk, ScoredChunk};
use crate::registry::KnowledgeBaseRegistry;

/// Default number of chunks fed to generation.
pub const DEFAULT_TOP_K: usize = 5;

/// Embeds queries and searches a single knowledge base's namespace.
#[derive(Clone)]
pub struct Retriever {
    registry: Arc<KnowledgeBaseRegistry>,
}

impl Retriever {
    pub fn new(registry: Arc<KnowledgeBaseRegistry>) -> Self {
        Self { registry }
    }

    /// The `k` chunks of `kb_id` most similar to `query`, best first.
    ///
    /// The id is resolved before anything is embedded, so an unknown id
    /// costs no backend calls. A namespace with fewer than `k` chunks
    /// returns what it has.
    pub async fn retrieve(&self, kb_id: &str, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let kb = self.registry.lookup(kb_id)?;

        let vector = self
            .registry
            .embedder()
            .embed_query(query)
            .await
            .map_err(|e| Error::Embedding(format!("{:#}", e)))?;
        let matches = self
            .registry
            .index()
            .query(&kb.namespace, &vector, k)
            .await
            .map_err(|e| Error::Index(format!("{:#}", e)))?;
        debug!("{}: {} matches for query", kb_id, matches.len());

        Ok(matches
            .into_iter()
            .map(|m| ScoredChunk {
                chunk: Chunk {
                    id: m.id,
                    hash: content_hash(&m.text),
                    content: m.text,
                    metadata: m.metadata,
                },
                score: m.score,
            })
            .collect())
    }
}
