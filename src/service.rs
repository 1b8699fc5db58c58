//! The QA agent as one injectable service.
//!
//! [`QaService`] owns every pipeline component: the ingestor, the chunker,
//! the knowledge-base registry and both generators. The HTTP layer and the
//! CLI hold it behind an `Arc`; there is no process-wide state.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::chunk::RecursiveSplitter;
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::ingest::Ingestor;
use crate::llm::{create_model, LanguageModel};
use crate::models::{TestCase, UploadedFile};
use crate::registry::KnowledgeBaseRegistry;
use crate::retrieve::Retriever;
use crate::script::ScriptGenerator;
use crate::testcases::TestCaseGenerator;
use crate::vector_index::{create_index, VectorIndex};

/// Result of one `/upload-docs` call.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub message: String,
    pub kb_id: String,
    /// Client-supplied names of the files that produced at least one
    /// document, in upload order. Staging only keeps the final path
    /// component, so these may differ from the names on disk.
    pub saved_files: Vec<String>,
    pub chunks_created: usize,
}

pub struct QaService {
    config: Config,
    ingestor: Ingestor,
    splitter: RecursiveSplitter,
    registry: Arc<KnowledgeBaseRegistry>,
    retriever: Retriever,
    test_cases: TestCaseGenerator,
    scripts: ScriptGenerator,
}

impl QaService {
    /// Assemble the service from explicit backends.
    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
        test_case_model: Arc<dyn LanguageModel>,
        script_model: Arc<dyn LanguageModel>,
    ) -> Self {
        let registry = Arc::new(KnowledgeBaseRegistry::new(
            embedder,
            index,
            config.embedding.batch_size,
        ));
        let retriever = Retriever::new(registry.clone());
        Self {
            ingestor: Ingestor::new(config.staging.dir.clone()),
            splitter: RecursiveSplitter::from_config(&config.chunking),
            test_cases: TestCaseGenerator::new(
                retriever.clone(),
                test_case_model,
                config.retrieval.top_k,
            ),
            scripts: ScriptGenerator::new(script_model),
            registry,
            retriever,
            config,
        }
    }

    /// Build every backend named in `config`, make sure the vector index
    /// exists and create the staging directory.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let index = create_index(&config.vector_index).await?;
        let test_case_model = create_model(&config.generation.test_cases)?;
        let script_model = create_model(&config.generation.scripts)?;

        info!(
            "Embedding with {} ({} dims); vectors in {}",
            embedder.model_name(),
            embedder.dims(),
            index.describe()
        );
        info!(
            "Test cases via {}, scripts via {}",
            test_case_model.model_name(),
            script_model.model_name()
        );

        let service = Self::new(config, embedder, index, test_case_model, script_model);
        service.ingestor.prepare().await?;
        Ok(service)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    pub fn splitter(&self) -> &RecursiveSplitter {
        &self.splitter
    }

    pub fn registry(&self) -> &Arc<KnowledgeBaseRegistry> {
        &self.registry
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Stage and extract every file, chunk the documents and register a new
    /// knowledge base for them.
    pub async fn upload_documents(&self, files: Vec<UploadedFile>) -> Result<UploadReport> {
        if files.is_empty() {
            return Err(Error::Upload("no files were uploaded".to_string()));
        }
        // Staging directory failures fail the whole request.
        self.ingestor.prepare().await?;

        let mut documents = Vec::new();
        let mut saved_files = Vec::new();
        for file in &files {
            let docs = self.ingestor.ingest(file).await;
            if !docs.is_empty() {
                saved_files.push(file.name.clone());
            }
            documents.extend(docs);
        }
        if documents.is_empty() {
            return Err(Error::Upload(format!(
                "no text could be extracted from {} uploaded file(s)",
                files.len()
            )));
        }

        let chunks = self.splitter.split_documents(&documents);
        let kb_id = self.registry.create(&chunks, saved_files.clone()).await?;

        Ok(UploadReport {
            message: format!(
                "Files saved to '{}/' and processed successfully.",
                self.ingestor.staging_dir().display()
            ),
            kb_id,
            saved_files,
            chunks_created: chunks.len(),
        })
    }

    pub async fn generate_test_cases(&self, kb_id: &str, query: &str) -> Result<Vec<TestCase>> {
        self.test_cases.generate(kb_id, query).await
    }

    pub async fn generate_script(&self, test_case: &TestCase, html: &str) -> Result<String> {
        self.scripts.generate(test_case, html).await
    }
}
