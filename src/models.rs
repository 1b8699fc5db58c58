//! Core data models used throughout the QA agent.
//!
//! These types represent the uploaded files, documents, chunks, knowledge
//! bases, and test cases that flow through the ingestion and generation
//! pipeline.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata mapping attached to documents and chunks.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key holding the original upload file name.
pub const META_SOURCE: &str = "source";
/// Metadata key holding the staging path of the raw upload.
pub const META_FILE_PATH: &str = "file_path";
/// Metadata key holding the detected content type.
pub const META_CONTENT_TYPE: &str = "content_type";
/// Metadata key holding the 0-based PDF page number.
pub const META_PAGE: &str = "page";
/// Metadata key holding the PDF page count.
pub const META_TOTAL_PAGES: &str = "total_pages";
/// Metadata key holding a chunk's position within its parent document.
pub const META_CHUNK_INDEX: &str = "chunk_index";

/// A file received from a client, before anything is written or extracted.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Normalized text produced by the ingestor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }

    /// The originating file name, if recorded.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE).map(String::as_str)
    }
}

/// A bounded slice of a document's text; the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    /// SHA-256 hex digest of `content`.
    pub hash: String,
}

impl Chunk {
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE).map(String::as_str)
    }
}

/// A chunk returned from a similarity query, with its score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// A registered knowledge base: one ingestion batch in its own namespace.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBase {
    pub kb_id: String,
    /// Namespace inside the shared vector index. Equal to `kb_id`.
    pub namespace: String,
    pub chunk_count: usize,
    pub source_files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Keys every generated test case is asked to carry.
pub const TEST_CASE_KEYS: [&str; 5] = [
    "Test_ID",
    "Feature",
    "Test_Scenario",
    "Expected_Result",
    "Grounded_In",
];

/// A generated test-case record.
///
/// Records are kept as the model produced them; none of the five keys is
/// guaranteed to be present, so accessors return `Option`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestCase(pub Map<String, Value>);

impl TestCase {
    /// String value of `key`, if present and a string.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn test_id(&self) -> Option<&str> {
        self.field("Test_ID")
    }

    /// Names of the required keys this record lacks.
    pub fn missing_keys(&self) -> Vec<&'static str> {
        TEST_CASE_KEYS
            .iter()
            .copied()
            .filter(|k| !self.0.contains_key(*k))
            .collect()
    }
}
