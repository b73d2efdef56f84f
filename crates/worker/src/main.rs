use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use slidegen_pipeline::{
    PipelineDeps, StaticTokenProvider, StubAnalysisProvider, StubSlidesProvider,
};
use slidegen_queue::{FsArtifactStorage, PostgresStore};
use slidegen_worker::{Worker, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    slidegen_observability::init();

    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL is not set"))?;
    let artifact_root = std::env::var("ARTIFACT_ROOT").unwrap_or_else(|_| {
        tracing::warn!("ARTIFACT_ROOT not set; using ./artifacts");
        "./artifacts".to_string()
    });

    let config = WorkerConfig::from_env()?;
    let store = Arc::new(PostgresStore::connect(&database_url).await?);

    let deps = PipelineDeps {
        store,
        blobs: Arc::new(FsArtifactStorage::new(artifact_root)),
        // Offline providers; swap in the real backends at deployment.
        analysis: Arc::new(StubAnalysisProvider::new()),
        slides: Arc::new(StubSlidesProvider::new()),
        tokens: Arc::new(StaticTokenProvider::default()),
        worker: config.worker_id.clone(),
    };

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_token.cancel();
        }
    });

    Worker::new(config, deps).run(shutdown).await;
    Ok(())
}
