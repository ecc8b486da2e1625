//! Vector index: record storage and nearest-neighbour queries over one
//! named collection.
//!
//! Two backends implement [`VectorIndex`]:
//! - [`local::LocalIndex`]: embedded, JSON on disk, brute-force scoring
//! - [`qdrant::QdrantIndex`]: Qdrant over its REST API
//!
//! [`connect`] opens the configured backend and refuses to hand it out unless
//! the collection's dimension and metric match what the embedder produces.

pub mod local;
pub mod qdrant;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::models::{Chunk, SourceDoc};

/// Similarity metric, fixed when a collection is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    Cosine,
    Dot,
    Euclid,
}

impl Distance {
    /// Similarity between two equal-length vectors; higher is closer for every metric.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Distance::Cosine => cosine_similarity(a, b),
            Distance::Dot => a.iter().zip(b).map(|(x, y)| x * y).sum(),
            Distance::Euclid => {
                let sq: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
                -sq.sqrt()
            }
        }
    }
}

impl std::fmt::Display for Distance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Distance::Cosine => "Cosine",
            Distance::Dot => "Dot",
            Distance::Euclid => "Euclid",
        };
        f.write_str(name)
    }
}

impl FromStr for Distance {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(Distance::Cosine),
            "dot" => Ok(Distance::Dot),
            "euclid" | "euclidean" => Ok(Distance::Euclid),
            other => Err(Error::Configuration(format!("Unknown distance: {other}"))),
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// A vector with the chunk text and metadata it was computed from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexRecord {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: serde_json::Value,
}

impl IndexRecord {
    /// Build the record for a chunk. The id is derived from
    /// `(document_id, sequence_index)` so a retried upsert overwrites instead
    /// of duplicating.
    pub fn from_chunk(chunk: &Chunk, vector: Vec<f32>, model: &str) -> Self {
        Self {
            id: record_id(chunk.document_id, chunk.sequence_index),
            vector,
            text: chunk.text.clone(),
            metadata: serde_json::json!({
                "document_id": chunk.document_id,
                "sequence_index": chunk.sequence_index,
                "page_number": chunk.metadata.page_number,
                "source": chunk.metadata.source,
                "start_offset": chunk.metadata.start_offset,
                "end_offset": chunk.metadata.end_offset,
                "embedding_model": model,
            }),
        }
    }
}

pub fn record_id(document_id: Uuid, sequence_index: usize) -> Uuid {
    Uuid::new_v5(&document_id, sequence_index.to_string().as_bytes())
}

/// A query hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub id: Uuid,
    pub text: String,
    pub metadata: serde_json::Value,
    pub score: f32,
}

impl ScoredRecord {
    pub fn into_source(self) -> SourceDoc {
        SourceDoc {
            page_content: self.text,
            metadata: self.metadata,
            score: self.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub distance: Distance,
    pub points: usize,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn describe(&self) -> Result<CollectionInfo>;

    /// Insert records, replacing any with the same id. All or nothing per call.
    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<()>;

    /// At most `k` hits ordered by descending score. With `embedding_model`
    /// set, only records stamped with that model are candidates, so the
    /// filter is applied before the top-K cut.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        embedding_model: Option<&str>,
    ) -> Result<Vec<ScoredRecord>>;
}

pub(crate) fn record_model(metadata: &serde_json::Value) -> Option<&str> {
    metadata.get("embedding_model").and_then(|m| m.as_str())
}

/// Fail unless the collection was created for `dimension`-sized vectors under `distance`.
pub fn check_compatibility(info: &CollectionInfo, dimension: usize, distance: Distance) -> Result<()> {
    if info.dimension != dimension {
        return Err(Error::IndexConfiguration(format!(
            "collection '{}' holds {}-dimensional vectors but the embedder produces {dimension}",
            info.name, info.dimension
        )));
    }
    if info.distance != distance {
        return Err(Error::IndexConfiguration(format!(
            "collection '{}' uses {} similarity but {distance} is configured",
            info.name, info.distance
        )));
    }
    Ok(())
}

/// Open the configured backend and verify it is compatible.
pub async fn connect(
    config: &IndexConfig,
    vector_dir: &Path,
    dimension: usize,
    client: reqwest::Client,
) -> Result<Arc<dyn VectorIndex>> {
    let index: Arc<dyn VectorIndex> = match config.backend.as_str() {
        "local" => Arc::new(local::LocalIndex::open(
            vector_dir,
            &config.collection,
            dimension,
            config.distance,
            config.create_collection,
        )?),
        "qdrant" => Arc::new(qdrant::QdrantIndex::connect(client, config, dimension).await?),
        other => {
            return Err(Error::Configuration(format!(
                "Unknown index backend: {other}"
            )))
        }
    };

    let info = index.describe().await?;
    check_compatibility(&info, dimension, config.distance)?;
    tracing::info!(
        "Connected to collection '{}' ({} dims, {}, {} points)",
        info.name,
        info.dimension,
        info.distance,
        info.points
    );
    Ok(index)
}
