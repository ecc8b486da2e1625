//! Qdrant REST backend.
//!
//! Points are stored with a `content` + `metadata` payload, the layout other
//! Qdrant document stores use, so collections can be shared with them.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CollectionInfo, Distance, IndexRecord, ScoredRecord, VectorIndex};
use crate::config::IndexConfig;
use crate::error::{Error, Result};

pub struct QdrantIndex {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    collection: String,
}

impl QdrantIndex {
    /// Connect to an existing collection, creating it when configured to.
    pub async fn connect(
        client: reqwest::Client,
        config: &IndexConfig,
        dimension: usize,
    ) -> Result<Self> {
        let index = Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            collection: config.collection.clone(),
        };

        match index.describe().await {
            Err(Error::CollectionNotFound(_)) if config.create_collection => {
                index.create(dimension, config.distance).await?;
            }
            other => {
                let _ = other?;
            }
        }
        Ok(index)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/collections/{}{path}", self.base_url, self.collection)
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match &self.api_key {
            Some(key) => req.header("api-key", key),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let resp = req
            .send()
            .await
            .map_err(|e| Error::Index(format!("Qdrant {what} request failed: {e}")))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(Error::CollectionNotFound(self.collection.clone()));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Index(format!("Qdrant {what} returned {status}: {body}")));
        }
        Ok(resp)
    }

    async fn create(&self, dimension: usize, distance: Distance) -> Result<()> {
        tracing::info!(
            "Creating Qdrant collection '{}' ({dimension} dims, {distance})",
            self.collection
        );
        let body = serde_json::json!({
            "vectors": { "size": dimension, "distance": distance },
        });
        self.send(
            self.request(reqwest::Method::PUT, self.url("")).json(&body),
            "create collection",
        )
        .await?;
        Ok(())
    }
}

// ─── Wire types ──────────────────────────────────────────

#[derive(Deserialize)]
struct QdrantReply<T> {
    result: T,
}

#[derive(Deserialize)]
struct CollectionResult {
    #[serde(default)]
    points_count: Option<usize>,
    config: CollectionConfig,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: serde_json::Value,
}

#[derive(Deserialize)]
struct VectorParams {
    size: usize,
    distance: String,
}

#[derive(Serialize)]
struct UpsertBody {
    points: Vec<PointStruct>,
}

#[derive(Serialize)]
struct PointStruct {
    id: Uuid,
    vector: Vec<f32>,
    payload: serde_json::Value,
}

#[derive(Serialize)]
struct SearchBody<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<serde_json::Value>,
}

/// Payload filter keeping only points embedded with `model`.
fn model_filter(model: &str) -> serde_json::Value {
    serde_json::json!({
        "must": [{ "key": "metadata.embedding_model", "match": { "value": model } }]
    })
}

#[derive(Deserialize)]
struct SearchHit {
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

fn parse_vector_params(name: &str, vectors: serde_json::Value) -> Result<(usize, Distance)> {
    let params: VectorParams = serde_json::from_value(vectors).map_err(|_| {
        Error::IndexConfiguration(format!(
            "collection '{name}' uses named vectors, expected a single unnamed vector"
        ))
    })?;
    let distance = params.distance.parse().map_err(|_| {
        Error::IndexConfiguration(format!(
            "collection '{name}' uses unsupported distance {}",
            params.distance
        ))
    })?;
    Ok((params.size, distance))
}

fn hit_to_record(hit: SearchHit, distance: Distance) -> ScoredRecord {
    let payload = hit.payload.unwrap_or(serde_json::Value::Null);
    let text = payload
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    let metadata = payload
        .get("metadata")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    let id = hit
        .id
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_default();
    // Qdrant reports euclid as a distance; flip it so higher is closer
    let score = match distance {
        Distance::Euclid => -hit.score,
        _ => hit.score,
    };
    ScoredRecord {
        id,
        text,
        metadata,
        score,
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn describe(&self) -> Result<CollectionInfo> {
        let resp = self
            .send(self.request(reqwest::Method::GET, self.url("")), "get collection")
            .await?;
        let reply: QdrantReply<CollectionResult> = resp
            .json()
            .await
            .map_err(|e| Error::Index(format!("Failed to parse Qdrant collection info: {e}")))?;
        let (dimension, distance) =
            parse_vector_params(&self.collection, reply.result.config.params.vectors)?;
        Ok(CollectionInfo {
            name: self.collection.clone(),
            dimension,
            distance,
            points: reply.result.points_count.unwrap_or(0),
        })
    }

    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let body = UpsertBody {
            points: records
                .into_iter()
                .map(|r| PointStruct {
                    id: r.id,
                    vector: r.vector,
                    payload: serde_json::json!({ "content": r.text, "metadata": r.metadata }),
                })
                .collect(),
        };
        self.send(
            self.request(reqwest::Method::PUT, self.url("/points?wait=true"))
                .json(&body),
            "upsert",
        )
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        embedding_model: Option<&str>,
    ) -> Result<Vec<ScoredRecord>> {
        if k == 0 {
            return Err(Error::Validation("k must be at least 1".into()));
        }
        let info = self.describe().await?;
        if vector.len() != info.dimension {
            return Err(Error::IndexConfiguration(format!(
                "query vector has {} dimensions, collection expects {}",
                vector.len(),
                info.dimension
            )));
        }

        let body = SearchBody {
            vector,
            limit: k,
            with_payload: true,
            filter: embedding_model.map(model_filter),
        };
        let resp = self
            .send(
                self.request(reqwest::Method::POST, self.url("/points/search"))
                    .json(&body),
                "search",
            )
            .await?;
        let reply: QdrantReply<Vec<SearchHit>> = resp
            .json()
            .await
            .map_err(|e| Error::Index(format!("Failed to parse Qdrant search reply: {e}")))?;

        let mut hits: Vec<ScoredRecord> = reply
            .result
            .into_iter()
            .map(|h| hit_to_record(h, info.distance))
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}
