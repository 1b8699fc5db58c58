//! Knowledge-base registry.
//!
//! A knowledge base is one ingestion batch: its chunks are embedded and
//! written into the shared vector index under a namespace equal to the
//! freshly generated `kb_id`, then the id is recorded in a concurrent map so
//! later requests can find it.
//!
//! The map lives only as long as the process. After a restart the vectors
//! may still exist remotely, but their ids are no longer known here and
//! [`KnowledgeBaseRegistry::lookup`] reports them as not found.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::models::{Chunk, KnowledgeBase};
use crate::vector_index::{VectorIndex, VectorRecord};

/// Owns the `kb_id → KnowledgeBase` table and the backends used to fill it.
pub struct KnowledgeBaseRegistry {
    bases: DashMap<String, KnowledgeBase>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
}

/// `kb_` followed by 32 hex digits of a v4 UUID (122 random bits).
pub fn new_kb_id() -> String {
    format!("kb_{}", Uuid::new_v4().simple())
}

impl KnowledgeBaseRegistry {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        batch_size: usize,
    ) -> Self {
        Self {
            bases: DashMap::new(),
            embedder,
            index,
            batch_size: batch_size.max(1),
        }
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Embed `chunks`, write them under a new namespace and register it.
    ///
    /// The id is only registered once every batch has been written, so a
    /// failed creation never becomes visible to [`lookup`](Self::lookup).
    pub async fn create(&self, chunks: &[Chunk], source_files: Vec<String>) -> Result<String> {
        if chunks.is_empty() {
            return Err(Error::Upload(
                "no chunks to index; nothing was extracted from the uploaded files".to_string(),
            ));
        }

        let kb_id = new_kb_id();
        let namespace = kb_id.clone();

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .map_err(|e| Error::Embedding(format!("{:#}", e)))?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }

            let records: Vec<VectorRecord> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, values)| VectorRecord {
                    id: chunk.id.clone(),
                    values,
                    text: chunk.content.clone(),
                    metadata: chunk.metadata.clone(),
                })
                .collect();
            self.index
                .upsert(&namespace, &records)
                .await
                .map_err(|e| Error::Index(format!("{:#}", e)))?;
            debug!("{}: upserted {} vectors", kb_id, records.len());
        }

        let kb = KnowledgeBase {
            kb_id: kb_id.clone(),
            namespace,
            chunk_count: chunks.len(),
            source_files,
            created_at: Utc::now(),
        };
        info!(
            "Created knowledge base {} ({} chunks from {} files)",
            kb_id,
            kb.chunk_count,
            kb.source_files.len()
        );
        self.bases.insert(kb_id.clone(), kb);
        Ok(kb_id)
    }

    pub fn lookup(&self, kb_id: &str) -> Result<KnowledgeBase> {
        self.bases
            .get(kb_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::not_found(kb_id))
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    /// Every registered knowledge base, oldest first.
    pub fn list(&self) -> Vec<KnowledgeBase> {
        let mut bases: Vec<KnowledgeBase> =
            self.bases.iter().map(|entry| entry.value().clone()).collect();
        bases.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        bases
    }
}
