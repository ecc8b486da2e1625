//! # pdf-rag
//!
//! A Rust service for asking questions about uploaded PDF documents.
//! Uploads are ingested in the background into a vector index; questions are
//! answered by a text-generation model grounded on the closest chunks.
//!
//! ## Architecture
//!
//! Ingestion and retrieval share the embedder and the vector index:
//!
//! ```text
//!   POST /api/upload                         POST /api/chat
//!         │                                        │
//!         ▼                                        ▼
//!  ┌──────────────┐                      ┌───────────────────┐
//!  │  Job Queue   │  durable, leased,    │  Answer Service   │
//!  │  ("files")   │  retry + backoff     │  validate query   │
//!  └──────┬───────┘                      └─────────┬─────────┘
//!         │ claim                                  │ embed query
//!         ▼                                        ▼
//!  ┌──────────────┐                      ┌───────────────────┐
//!  │ Worker Pool  │  N concurrent jobs   │  top-K query      │
//!  │  (timeout)   │                      │  model-tag filter │
//!  └──────┬───────┘                      └─────────┬─────────┘
//!         ▼                                        │
//!  ┌──────────────┐                                │
//!  │  Ingestion   │  Loading → Splitting           │
//!  │  Pipeline    │  → Embedding → Indexing        │
//!  └──────┬───────┘                                │
//!         │ upsert                                 │
//!         ▼                                        ▼
//!  ┌──────────────────────────────────────────────────────┐
//!  │            Vector Index (local JSON / Qdrant)        │
//!  └──────────────────────────────────────────────────────┘
//!                                                  │ hits
//!                                                  ▼
//!                                        ┌───────────────────┐
//!                                        │ Grounded prompt → │
//!                                        │ Generator (Gemini)│
//!                                        └───────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for server, data dir, models, index and queue
//! - [`error`] - Error taxonomy shared by the pipeline, the queue and the HTTP layer
//! - [`models`] - Shared data types: `Document`, `Chunk`, `FilePayload`, request/response types
//! - [`loader`] - PDF (per page) and plain-text document loaders
//! - [`chunking`] - Separator-aware character splitting with overlap
//! - [`llm::embeddings`] - Batch embedding generation via Ollama or OpenAI-compatible APIs
//! - [`llm::generate`] - Text generation via Gemini or OpenAI-compatible APIs
//! - [`index`] - Vector index trait, connect-time compatibility check, local and Qdrant backends
//! - [`queue`] - Durable job queue with leases, attempts and exponential backoff
//! - [`pipeline`] - Load → split → embed → index for one uploaded file
//! - [`worker`] - Worker pool consuming the queue with per-job timeouts
//! - [`rag`] - Retrieval and grounded answer generation
//! - [`api`] - Axum HTTP handlers for upload, chat, job status and health
//! - [`state`] - Shared application state wiring the collaborators together

pub mod api;
pub mod chunking;
pub mod config;
pub mod error;
pub mod index;
pub mod llm;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod rag;
pub mod state;
pub mod worker;

pub use error::{Error, Result};
