//! Ingestion pipeline: load → split → embed → index for one uploaded file.

use std::path::PathBuf;
use std::sync::Arc;

use crate::chunking::{chunk_document, ChunkParams};
use crate::error::{Error, Result};
use crate::index::{IndexRecord, VectorIndex};
use crate::llm::Embedder;
use crate::loader::DocumentLoader;
use crate::models::FilePayload;
use crate::queue::IngestStage;

/// Chunks sent to the embedder per call.
const EMBED_BATCH_SIZE: usize = 64;
/// Records written to the index per upsert.
const UPSERT_BATCH_SIZE: usize = 256;

/// Counts for one completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub segments: usize,
    pub chunks: usize,
}

pub struct IngestionPipeline {
    loader: Arc<dyn DocumentLoader>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    params: ChunkParams,
}

impl IngestionPipeline {
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        params: ChunkParams,
    ) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            loader,
            embedder,
            index,
            params,
        })
    }

    /// Run every stage for `payload`. `on_stage` is called as each stage
    /// starts and again before every embed and upsert batch, which keeps the
    /// job's lease alive through long stages. An error from `on_stage` aborts
    /// the run.
    pub async fn run(
        &self,
        payload: &FilePayload,
        on_stage: &(dyn Fn(IngestStage) -> Result<()> + Send + Sync),
    ) -> Result<IngestReport> {
        let doc = payload.document();
        let doc_id = doc.id;

        // ── Step 1: Load ──────────────────────────────────────
        on_stage(IngestStage::Loading)?;
        let loader = self.loader.clone();
        let path = PathBuf::from(&doc.source_path);
        let mime = doc.mime_type.clone();
        let segments = tokio::task::spawn_blocking(move || loader.load(&path, &mime))
            .await
            .map_err(|e| Error::load(doc.source_path.clone(), format!("loader task failed: {e}")))??;

        if segments.is_empty() {
            tracing::warn!("Document {doc_id} ({}) has no extractable text", doc.file_name);
            return Ok(IngestReport::default());
        }
        tracing::info!("Loaded {} segments from {} ({doc_id})", segments.len(), doc.file_name);

        // ── Step 2: Split ─────────────────────────────────────
        on_stage(IngestStage::Splitting)?;
        let chunks = chunk_document(doc_id, &segments, &self.params)?;
        if chunks.is_empty() {
            tracing::warn!("Document {doc_id} produced no chunks from {} segments", segments.len());
            return Ok(IngestReport {
                segments: segments.len(),
                chunks: 0,
            });
        }
        tracing::info!("Split {doc_id} into {} chunks", chunks.len());

        // ── Step 3: Embed ─────────────────────────────────────
        let model = self.embedder.model().to_string();
        let mut records = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            on_stage(IngestStage::Embedding)?;
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }
            records.extend(
                batch
                    .iter()
                    .zip(vectors)
                    .map(|(chunk, vector)| IndexRecord::from_chunk(chunk, vector, &model)),
            );
        }

        // ── Step 4: Index ─────────────────────────────────────
        let total = records.len();
        let mut pending = records.into_iter().peekable();
        while pending.peek().is_some() {
            on_stage(IngestStage::Indexing)?;
            let batch: Vec<IndexRecord> = pending.by_ref().take(UPSERT_BATCH_SIZE).collect();
            self.index.upsert(batch).await?;
        }
        tracing::info!("Added {total} records for {doc_id} to the index");

        Ok(IngestReport {
            segments: segments.len(),
            chunks: total,
        })
    }
}
