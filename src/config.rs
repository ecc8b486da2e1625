use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::chunking::ChunkParams;
use crate::error::{Error, Result};
use crate::index::Distance;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where uploads, queue state and the embedded index are stored
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Embedding provider configuration
    pub llm: LlmConfig,
    /// Text-generation provider configuration
    pub generation: GenerationConfig,
    /// Vector index backend configuration
    pub index: IndexConfig,
    /// Job queue and worker pool configuration
    pub queue: QueueConfig,
    pub chunking: ChunkParams,
    /// Number of chunks retrieved to ground an answer
    pub retrieval_k: usize,
    /// Maximum accepted upload size in MB
    pub max_upload_mb: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai"
    pub provider: String,
    /// Base URL for the embedding API
    pub base_url: String,
    /// Model name for embeddings
    pub embedding_model: String,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    /// Embedding vector dimension
    pub embedding_dim: usize,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// "gemini" or "openai"
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// "local" (embedded, file-backed) or "qdrant"
    pub backend: String,
    /// Qdrant REST URL
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
    pub distance: Distance,
    /// Create the collection when it does not exist instead of failing
    pub create_collection: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name jobs are enqueued on
    pub name: String,
    /// Maximum documents processed in parallel
    pub worker_concurrency: usize,
    /// Attempts before a job is moved to the terminal failed state
    pub max_attempts: u32,
    /// Base delay before a failed attempt is retried (doubles per attempt)
    pub retry_backoff_secs: u64,
    /// How long a claimed job stays invisible to other workers without a
    /// renewal. Must exceed `job_timeout_secs`.
    pub lease_secs: u64,
    pub poll_interval_ms: u64,
    /// Wall-clock limit for one job attempt
    pub job_timeout_secs: u64,
    /// Completed and failed jobs kept for status lookups
    pub retain_terminal_jobs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:3000".to_string(),
            llm: LlmConfig::default(),
            generation: GenerationConfig::default(),
            index: IndexConfig::default(),
            queue: QueueConfig::default(),
            chunking: ChunkParams::default(),
            retrieval_k: 2,
            max_upload_mb: 50,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            embedding_model: "all-minilm".to_string(),
            api_key: None,
            embedding_dim: 384,
            timeout_secs: 60,
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: "local".to_string(),
            url: "http://localhost:6333".to_string(),
            api_key: None,
            collection: "Embedding_Testing".to_string(),
            distance: Distance::Cosine,
            create_collection: true,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "files".to_string(),
            worker_concurrency: 5,
            max_attempts: 3,
            retry_backoff_secs: 5,
            lease_secs: 900,
            poll_interval_ms: 500,
            job_timeout_secs: 600,
            retain_terminal_jobs: 1000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, target: &mut T) {
    if let Ok(val) = std::env::var(key) {
        match val.parse() {
            Ok(v) => *target = v,
            Err(_) => tracing::warn!("Ignoring unparseable {key}={val}"),
        }
    }
}

fn env_string(key: &str, target: &mut String) {
    if let Ok(val) = std::env::var(key) {
        *target = val;
    }
}

fn env_opt(key: &str, target: &mut Option<String>) {
    if let Ok(val) = std::env::var(key) {
        if !val.is_empty() {
            *target = Some(val);
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("PDF_RAG_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        env_string("PDF_RAG_BIND_ADDR", &mut config.bind_addr);
        env_parse("PDF_RAG_RETRIEVAL_K", &mut config.retrieval_k);
        env_parse("PDF_RAG_MAX_UPLOAD_MB", &mut config.max_upload_mb);
        env_parse("PDF_RAG_CHUNK_SIZE", &mut config.chunking.chunk_size);
        env_parse("PDF_RAG_CHUNK_OVERLAP", &mut config.chunking.chunk_overlap);

        // Embeddings
        env_string("LLM_PROVIDER", &mut config.llm.provider);
        env_string("LLM_BASE_URL", &mut config.llm.base_url);
        env_string("LLM_EMBEDDING_MODEL", &mut config.llm.embedding_model);
        env_opt("LLM_API_KEY", &mut config.llm.api_key);
        env_parse("LLM_EMBEDDING_DIM", &mut config.llm.embedding_dim);
        env_parse("LLM_TIMEOUT_SECS", &mut config.llm.timeout_secs);

        // Generation
        env_string("GENERATION_PROVIDER", &mut config.generation.provider);
        env_string("GENERATION_BASE_URL", &mut config.generation.base_url);
        env_string("GENERATION_MODEL", &mut config.generation.model);
        env_opt("GENERATION_API_KEY", &mut config.generation.api_key);
        if config.generation.api_key.is_none() {
            env_opt("GEMINI_API_KEY", &mut config.generation.api_key);
        }
        env_parse("GENERATION_TIMEOUT_SECS", &mut config.generation.timeout_secs);

        // Vector index
        env_string("PDF_RAG_INDEX_BACKEND", &mut config.index.backend);
        env_string("QDRANT_URL", &mut config.index.url);
        env_opt("QDRANT_API_KEY", &mut config.index.api_key);
        env_string("QDRANT_COLLECTION", &mut config.index.collection);
        env_parse("QDRANT_DISTANCE", &mut config.index.distance);
        env_parse("QDRANT_CREATE_COLLECTION", &mut config.index.create_collection);

        // Queue / workers
        env_string("PDF_RAG_QUEUE_NAME", &mut config.queue.name);
        env_parse("PDF_RAG_WORKER_CONCURRENCY", &mut config.queue.worker_concurrency);
        env_parse("PDF_RAG_MAX_ATTEMPTS", &mut config.queue.max_attempts);
        env_parse("PDF_RAG_RETRY_BACKOFF_SECS", &mut config.queue.retry_backoff_secs);
        env_parse("PDF_RAG_LEASE_SECS", &mut config.queue.lease_secs);
        env_parse("PDF_RAG_POLL_INTERVAL_MS", &mut config.queue.poll_interval_ms);
        env_parse("PDF_RAG_JOB_TIMEOUT_SECS", &mut config.queue.job_timeout_secs);
        env_parse("PDF_RAG_RETAIN_JOBS", &mut config.queue.retain_terminal_jobs);

        config
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if self.retrieval_k == 0 {
            return Err(Error::Configuration("retrieval_k must be at least 1".into()));
        }
        if self.queue.worker_concurrency == 0 {
            return Err(Error::Configuration(
                "worker_concurrency must be at least 1".into(),
            ));
        }
        if self.queue.max_attempts == 0 {
            return Err(Error::Configuration("max_attempts must be at least 1".into()));
        }
        // An attempt is aborted at the job timeout, so it never outlives its lease
        if self.queue.lease_secs <= self.queue.job_timeout_secs {
            return Err(Error::Configuration(format!(
                "lease_secs ({}) must be greater than job_timeout_secs ({})",
                self.queue.lease_secs, self.queue.job_timeout_secs
            )));
        }
        if self.llm.embedding_dim == 0 {
            return Err(Error::Configuration("embedding_dim must be at least 1".into()));
        }
        Ok(())
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }

    pub fn queue_path(&self) -> PathBuf {
        self.data_dir.join(format!("queue-{}.json", self.queue.name))
    }
}
