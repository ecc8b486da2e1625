use std::sync::Arc;

use crate::config::Config;
use crate::index::{self, VectorIndex};
use crate::llm::{Embedder, Generator, HttpEmbedder, HttpGenerator};
use crate::loader::{DocumentLoader, FileLoader};
use crate::pipeline::IngestionPipeline;
use crate::queue::{JobQueue, QueuePolicy};
use crate::rag::AnswerService;

/// Concurrent chat requests allowed to reach the generator.
const MAX_CONCURRENT_CHATS: usize = 3;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub queue: Arc<JobQueue>,
    pub index: Arc<dyn VectorIndex>,
    pub pipeline: Arc<IngestionPipeline>,
    pub answers: Arc<AnswerService>,
    pub http_client: reqwest::Client,
    pub chat_semaphore: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    /// Connect every collaborator described by `config`.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        config.validate()?;

        // Ensure data directories exist
        std::fs::create_dir_all(config.uploads_dir())?;
        std::fs::create_dir_all(config.vector_dir())?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        let embedder: Arc<dyn Embedder> =
            Arc::new(HttpEmbedder::new(http_client.clone(), config.llm.clone())?);
        let generator: Arc<dyn Generator> =
            Arc::new(HttpGenerator::new(http_client.clone(), config.generation.clone())?);
        let index = index::connect(
            &config.index,
            &config.vector_dir(),
            embedder.dimension(),
            http_client.clone(),
        )
        .await?;
        let queue = Arc::new(JobQueue::open(
            &config.queue_path(),
            &config.queue.name,
            QueuePolicy::from(&config.queue),
        )?);

        Ok(Self::from_parts(
            config,
            http_client,
            queue,
            index,
            Arc::new(FileLoader::default()),
            embedder,
            generator,
        )?)
    }

    /// Assemble state from already-connected collaborators.
    pub fn from_parts(
        config: Config,
        http_client: reqwest::Client,
        queue: Arc<JobQueue>,
        index: Arc<dyn VectorIndex>,
        loader: Arc<dyn DocumentLoader>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> crate::Result<Self> {
        let pipeline = IngestionPipeline::new(loader, embedder.clone(), index.clone(), config.chunking)?;
        let answers = AnswerService::new(embedder, index.clone(), generator, config.retrieval_k);

        Ok(Self {
            config,
            queue,
            index,
            pipeline: Arc::new(pipeline),
            answers: Arc::new(answers),
            http_client,
            chat_semaphore: Arc::new(tokio::sync::Semaphore::new(MAX_CONCURRENT_CHATS)),
        })
    }
}
