//! Vector index abstraction with namespace-scoped collections.
//!
//! The [`VectorIndex`] trait is the seam between the knowledge-base registry
//! and whatever stores the vectors. Every operation takes a namespace; an
//! implementation must never return a record written under one namespace
//! from a query against another.
//!
//! Implementations:
//! - **[`PineconeIndex`]**: Pinecone serverless index over its REST API.
//!   [`PineconeIndex::connect`] describes the configured index and creates
//!   it (dimension, metric, cloud, region from config) when missing.
//! - **[`InMemoryIndex`]**: brute-force similarity over vectors held in
//!   process memory; for tests and single-process deployments.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::VectorIndexConfig;
use crate::embedding::cosine_similarity;
use crate::models::Metadata;

/// Metadata key under which chunk text is stored next to its vector.
pub const TEXT_KEY: &str = "text";

/// Pinecone caps a single upsert request; stay well below it.
const PINECONE_UPSERT_BATCH: usize = 100;
const PINECONE_API_VERSION: &str = "2024-07";
/// How long [`PineconeIndex::connect`] waits for a freshly created index.
const PINECONE_READY_POLLS: u32 = 60;

/// A vector plus the chunk it was computed from.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

/// A query hit, best first.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub text: String,
    pub metadata: Metadata,
}

/// Similarity function used to rank matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Cosine,
    DotProduct,
    Euclidean,
}

impl Metric {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "cosine" => Ok(Metric::Cosine),
            "dotproduct" => Ok(Metric::DotProduct),
            "euclidean" => Ok(Metric::Euclidean),
            other => bail!("Unknown metric: {}", other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::DotProduct => "dotproduct",
            Metric::Euclidean => "euclidean",
        }
    }

    /// Higher is more similar for every metric.
    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine => cosine_similarity(a, b),
            Metric::DotProduct => a.iter().zip(b).map(|(x, y)| x * y).sum(),
            Metric::Euclidean => -a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt(),
        }
    }
}

/// Namespaced vector storage.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Human-readable backend description for logs.
    fn describe(&self) -> String;

    /// Dimensionality every stored vector must have.
    fn dims(&self) -> usize;

    /// Insert or overwrite records in `namespace`. Rejects vectors whose
    /// length differs from [`dims`](VectorIndex::dims).
    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()>;

    /// The `top_k` records of `namespace` most similar to `vector`, best
    /// first. An unknown or empty namespace yields an empty result.
    async fn query(&self, namespace: &str, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>>;
}

fn check_dims(expected: usize, records: &[VectorRecord]) -> Result<()> {
    if let Some(bad) = records.iter().find(|r| r.values.len() != expected) {
        bail!(
            "dimension mismatch for vector {}: expected {}, got {}",
            bad.id,
            expected,
            bad.values.len()
        );
    }
    Ok(())
}

/// Create the index configured in `[vector_index]`.
pub async fn create_index(config: &VectorIndexConfig) -> Result<Arc<dyn VectorIndex>> {
    match config.provider.as_str() {
        "memory" => Ok(Arc::new(InMemoryIndex::new(
            config.dims,
            Metric::parse(&config.metric)?,
        ))),
        "pinecone" => Ok(Arc::new(PineconeIndex::connect(config).await?)),
        other => bail!("Unknown vector_index provider: {}", other),
    }
}

// ============ In-memory index ============

/// In-process index: one `Vec` of records per namespace behind a `RwLock`.
pub struct InMemoryIndex {
    dims: usize,
    metric: Metric,
    namespaces: RwLock<HashMap<String, Vec<VectorRecord>>>,
}

impl InMemoryIndex {
    pub fn new(dims: usize, metric: Metric) -> Self {
        Self {
            dims,
            metric,
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    /// Number of records stored under `namespace`.
    pub fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .read()
            .map(|ns| ns.get(namespace).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    fn describe(&self) -> String {
        format!("in-memory ({} dims, {})", self.dims, self.metric.as_str())
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
        check_dims(self.dims, records)?;
        let mut namespaces = self
            .namespaces
            .write()
            .map_err(|_| anyhow::anyhow!("in-memory index lock poisoned"))?;
        let stored = namespaces.entry(namespace.to_string()).or_default();
        for record in records {
            stored.retain(|r| r.id != record.id);
            stored.push(record.clone());
        }
        Ok(())
    }

    async fn query(&self, namespace: &str, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        if vector.len() != self.dims {
            bail!(
                "dimension mismatch for query vector: expected {}, got {}",
                self.dims,
                vector.len()
            );
        }
        let namespaces = self
            .namespaces
            .read()
            .map_err(|_| anyhow::anyhow!("in-memory index lock poisoned"))?;
        let Some(records) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };
        let mut matches: Vec<VectorMatch> = records
            .iter()
            .map(|r| VectorMatch {
                id: r.id.clone(),
                score: self.metric.score(vector, &r.values),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);
        Ok(matches)
    }
}

// ============ Pinecone ============

/// Pinecone serverless index accessed over HTTPS.
///
/// Requires the `PINECONE_API_KEY` environment variable.
pub struct PineconeIndex {
    name: String,
    dims: usize,
    data_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl PineconeIndex {
    /// Describe the configured index, creating it if it does not exist, and
    /// wait until Pinecone reports it ready.
    pub async fn connect(config: &VectorIndexConfig) -> Result<Self> {
        let api_key = std::env::var("PINECONE_API_KEY")
            .map_err(|_| anyhow::anyhow!("PINECONE_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let control = config.control_url.trim_end_matches('/');

        let mut description = describe_index(&client, control, &api_key, &config.index_name).await?;
        if description.is_none() {
            info!(
                "Creating Pinecone index {} ({} dims, {}, {}/{})",
                config.index_name, config.dims, config.metric, config.cloud, config.region
            );
            let body = json!({
                "name": config.index_name,
                "dimension": config.dims,
                "metric": config.metric,
                "spec": {"serverless": {"cloud": config.cloud, "region": config.region}},
            });
            let response = client
                .post(format!("{}/indexes", control))
                .header("Api-Key", &api_key)
                .header("X-Pinecone-API-Version", PINECONE_API_VERSION)
                .json(&body)
                .send()
                .await?;
            let status = response.status();
            // 409: another process created it between describe and create.
            if !status.is_success() && status.as_u16() != 409 {
                let text = response.text().await.unwrap_or_default();
                bail!("Pinecone create index error {}: {}", status, text);
            }
        }

        let mut polls = 0;
        let host = loop {
            if let Some(desc) = &description {
                let ready = desc["status"]["ready"].as_bool().unwrap_or(false);
                if let (true, Some(host)) = (ready, desc["host"].as_str()) {
                    break host.to_string();
                }
            }
            if polls >= PINECONE_READY_POLLS {
                bail!("Pinecone index {} did not become ready", config.index_name);
            }
            polls += 1;
            tokio::time::sleep(Duration::from_secs(1)).await;
            description = describe_index(&client, control, &api_key, &config.index_name).await?;
        };

        let dims = description
            .as_ref()
            .and_then(|d| d["dimension"].as_u64())
            .map(|d| d as usize)
            .unwrap_or(config.dims);
        if dims != config.dims {
            bail!(
                "Pinecone index {} has dimension {} but vector_index.dims is {}",
                config.index_name,
                dims,
                config.dims
            );
        }

        let data_url = if host.starts_with("http") {
            host
        } else {
            format!("https://{}", host)
        };
        debug!("Pinecone index {} ready at {}", config.index_name, data_url);

        Ok(Self {
            name: config.index_name.clone(),
            dims,
            data_url,
            api_key,
            client,
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}{}", self.data_url, path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", PINECONE_API_VERSION)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Pinecone request to {} failed", path))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("Pinecone API error {} on {}: {}", status, path, text);
        }
        Ok(response.json().await?)
    }
}

async fn describe_index(
    client: &reqwest::Client,
    control: &str,
    api_key: &str,
    name: &str,
) -> Result<Option<Value>> {
    let response = client
        .get(format!("{}/indexes/{}", control, name))
        .header("Api-Key", api_key)
        .header("X-Pinecone-API-Version", PINECONE_API_VERSION)
        .send()
        .await
        .context("Pinecone control plane unreachable")?;
    let status = response.status();
    if status.as_u16() == 404 {
        return Ok(None);
    }
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        bail!("Pinecone describe index error {}: {}", status, text);
    }
    Ok(Some(response.json().await?))
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    fn describe(&self) -> String {
        format!("pinecone index {} ({} dims)", self.name, self.dims)
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn upsert(&self, namespace: &str, records: &[VectorRecord]) -> Result<()> {
        check_dims(self.dims, records)?;
        for batch in records.chunks(PINECONE_UPSERT_BATCH) {
            let vectors: Vec<Value> = batch.iter().map(pinecone_vector).collect();
            self.post(
                "/vectors/upsert",
                &json!({"vectors": vectors, "namespace": namespace}),
            )
            .await?;
        }
        Ok(())
    }

    async fn query(&self, namespace: &str, vector: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        let response = self
            .post(
                "/query",
                &json!({
                    "namespace": namespace,
                    "vector": vector,
                    "topK": top_k,
                    "includeMetadata": true,
                    "includeValues": false,
                }),
            )
            .await?;
        parse_pinecone_matches(&response)
    }
}

fn pinecone_vector(record: &VectorRecord) -> Value {
    let mut metadata: serde_json::Map<String, Value> = record
        .metadata
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    metadata.insert(TEXT_KEY.to_string(), Value::String(record.text.clone()));
    json!({"id": record.id, "values": record.values, "metadata": metadata})
}

fn parse_pinecone_matches(response: &Value) -> Result<Vec<VectorMatch>> {
    let Some(matches) = response.get("matches") else {
        return Ok(Vec::new());
    };
    let matches = matches
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Invalid Pinecone response: matches is not an array"))?;

    let mut out = Vec::with_capacity(matches.len());
    for m in matches {
        let id = m["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid Pinecone response: match without id"))?
            .to_string();
        let score = m["score"].as_f64().unwrap_or(0.0) as f32;
        let mut metadata = Metadata::new();
        let mut text = String::new();
        if let Some(fields) = m["metadata"].as_object() {
            for (key, value) in fields {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if key == TEXT_KEY {
                    text = value;
                } else {
                    metadata.insert(key.clone(), value);
                }
            }
        }
        out.push(VectorMatch {
            id,
            score,
            text,
            metadata,
        });
    }
    Ok(out)
}
