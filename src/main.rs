use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use pdf_rag::api;
use pdf_rag::config::Config;
use pdf_rag::state::AppState;
use pdf_rag::worker::WorkerPool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    config.validate()?;
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!(
        "Embeddings: {} {} ({})",
        config.llm.provider,
        config.llm.embedding_model,
        config.llm.base_url
    );
    tracing::info!("Generation: {} {}", config.generation.provider, config.generation.model);
    if config.generation.api_key.is_none() {
        tracing::warn!("No generation API key set (GENERATION_API_KEY / GEMINI_API_KEY)");
    }

    let state = AppState::new(config.clone()).await?;

    // Background ingestion
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = WorkerPool::new(state.queue.clone(), state.pipeline.clone(), &config.queue);
    let workers = tokio::spawn(pool.run(shutdown_rx));

    let queue = state.queue.clone();
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down");
    let _ = shutdown_tx.send(true);
    if let Err(e) = workers.await {
        tracing::error!("Worker pool task failed: {e}");
    }
    queue.close()?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
