//! Model collaborators: embeddings for ingestion and retrieval, text
//! generation for answers.

pub mod embeddings;
pub mod generate;

pub use embeddings::{Embedder, HttpEmbedder};
pub use generate::{Generator, HttpGenerator};
