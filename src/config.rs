use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector_index: VectorIndexConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

impl Config {
    /// Built-in defaults, used when no config file exists.
    pub fn minimal() -> Self {
        Self {
            server: ServerConfig::default(),
            staging: StagingConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector_index: VectorIndexConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct StagingConfig {
    #[serde(default = "default_staging_dir")]
    pub dir: PathBuf,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            dir: default_staging_dir(),
        }
    }
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("data")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_chunk_overlap() -> usize {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    crate::retrieve::DEFAULT_TOP_K
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            url: None,
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "local".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}
fn default_embedding_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorIndexConfig {
    #[serde(default = "default_index_provider")]
    pub provider: String,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_cloud")]
    pub cloud: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Control-plane base URL; overridable for testing against a proxy.
    #[serde(default = "default_control_url")]
    pub control_url: String,
    #[serde(default = "default_index_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            provider: default_index_provider(),
            index_name: default_index_name(),
            dims: default_dims(),
            metric: default_metric(),
            cloud: default_cloud(),
            region: default_region(),
            control_url: default_control_url(),
            timeout_secs: default_index_timeout_secs(),
        }
    }
}

fn default_index_provider() -> String {
    "pinecone".to_string()
}
fn default_index_name() -> String {
    "qa-agent-index".to_string()
}
fn default_metric() -> String {
    "cosine".to_string()
}
fn default_cloud() -> String {
    "aws".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_control_url() -> String {
    "https://api.pinecone.io".to_string()
}
fn default_index_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_test_case_model")]
    pub test_cases: ModelConfig,
    #[serde(default = "default_script_model")]
    pub scripts: ModelConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            test_cases: default_test_case_model(),
            scripts: default_script_model(),
        }
    }
}

/// Settings for one hosted language model.
#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    /// Override for OpenAI-compatible endpoints.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_test_case_model() -> ModelConfig {
    ModelConfig {
        provider: "gemini".to_string(),
        model: "gemini-2.5-flash".to_string(),
        temperature: 0.0,
        base_url: None,
        timeout_secs: default_model_timeout_secs(),
    }
}

fn default_script_model() -> ModelConfig {
    ModelConfig {
        provider: "openai".to_string(),
        model: "gpt-4o".to_string(),
        temperature: 0.0,
        base_url: None,
        timeout_secs: default_model_timeout_secs(),
    }
}

fn default_model_timeout_secs() -> u64 {
    120
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!(
            "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
            config.chunking.chunk_overlap,
            config.chunking.chunk_size
        );
    }

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "local" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, or ollama.",
            other
        ),
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.provider != "local" && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    // Validate vector index
    match config.vector_index.provider.as_str() {
        "pinecone" | "memory" => {}
        other => anyhow::bail!(
            "Unknown vector_index provider: '{}'. Must be pinecone or memory.",
            other
        ),
    }
    match config.vector_index.metric.as_str() {
        "cosine" | "dotproduct" | "euclidean" => {}
        other => anyhow::bail!(
            "Unknown vector_index.metric: '{}'. Must be cosine, dotproduct, or euclidean.",
            other
        ),
    }
    if config.vector_index.dims != config.embedding.dims {
        anyhow::bail!(
            "vector_index.dims ({}) must equal embedding.dims ({})",
            config.vector_index.dims,
            config.embedding.dims
        );
    }

    // Validate generation models
    for (name, model) in [
        ("generation.test_cases", &config.generation.test_cases),
        ("generation.scripts", &config.generation.scripts),
    ] {
        match model.provider.as_str() {
            "gemini" | "openai" => {}
            other => anyhow::bail!(
                "Unknown {}.provider: '{}'. Must be gemini or openai.",
                name,
                other
            ),
        }
        if model.model.trim().is_empty() {
            anyhow::bail!("{}.model must not be empty", name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("qa-agent.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let cfg = load_config(&write_config(&tmp, "")).unwrap();
        assert_eq!(cfg.chunking.chunk_size, 800);
        assert_eq!(cfg.chunking.chunk_overlap, 150);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.embedding.dims, 384);
        assert_eq!(cfg.vector_index.index_name, "qa-agent-index");
        assert_eq!(cfg.generation.test_cases.provider, "gemini");
        assert_eq!(cfg.generation.scripts.model, "gpt-4o");
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[chunking]\nchunk_size = 100\nchunk_overlap = 100\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_dims_must_match_index() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n",
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("vector_index.dims"));
    }

    #[test]
    fn test_unknown_model_provider_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(
            &tmp,
            "[generation.scripts]\nprovider = \"carrier-pigeon\"\nmodel = \"x\"\n",
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("generation.scripts.provider"));
    }

    #[test]
    fn test_memory_index_accepted() {
        let tmp = TempDir::new().unwrap();
        let path = write_config(&tmp, "[vector_index]\nprovider = \"memory\"\n");
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.vector_index.provider, "memory");
    }

    #[test]
    fn test_minimal_is_valid() {
        validate(&Config::minimal()).unwrap();
    }
}
