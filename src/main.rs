use clap::Parser;
use dotenvy::dotenv;
use meeting_digest::config::AppConfig;
use meeting_digest::services::assembler::UploadAssembler;
use meeting_digest::services::collaborators::Collaborators;
use meeting_digest::services::job_store::{FsJobStore, JobStore};
use meeting_digest::services::pipeline::{PipelineRunner, spawn_pipeline_pool};
use meeting_digest::services::storage::StorageLayout;
use meeting_digest::services::sweeper::RetentionSweeper;
use meeting_digest::{AppState, create_app};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for running pipeline jobs.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port for the API server (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory for uploads, results and job markers (overrides STORAGE_ROOT)
    #[arg(long)]
    storage_root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meeting_digest=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Meeting Digest...");

    let mut config = AppConfig::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(root) = args.storage_root {
        config.storage_root = root;
    }
    info!(
        "🛡️  Config: Storage={}, Max Size={}MB, Workers={}, Retention={:?}",
        config.storage_root.display(),
        config.max_upload_size / 1024 / 1024,
        config.pipeline_workers,
        config.retention_interval
    );

    // Storage and job bookkeeping
    let layout = StorageLayout::new(config.storage_root.clone());
    layout.ensure_root().await?;
    let store: Arc<dyn JobStore> = Arc::new(FsJobStore::new(layout.clone()));

    // Pipeline
    let collaborators = Collaborators::from_config(&config)?;
    let runner = Arc::new(PipelineRunner::new(
        store.clone(),
        layout.clone(),
        collaborators,
    ));
    let interrupted = runner.recover_interrupted().await?;
    if interrupted > 0 {
        warn!("♻️  Marked {} interrupted jobs as failed", interrupted);
    }
    let (pipeline, dispatcher) = spawn_pipeline_pool(
        runner,
        config.pipeline_workers,
        config.pipeline_queue_capacity,
    );

    let assembler = Arc::new(UploadAssembler::new(
        layout.clone(),
        config.max_upload_size,
    ));

    // Setup Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let sweeper = RetentionSweeper::new(
        layout.clone(),
        store.clone(),
        assembler.locks().clone(),
        config.retention_interval,
        shutdown_rx,
    );
    let sweeper_task = tokio::spawn(sweeper.run());

    let addr = config.bind_address();
    let state = AppState::new(config, layout, store, assembler, pipeline);

    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("✅ Server ready at http://{}", addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // The router (and with it the last pipeline handle) is gone; the
    // dispatcher finishes the queued jobs and exits.
    if tokio::time::timeout(DRAIN_TIMEOUT, dispatcher).await.is_err() {
        warn!("Pipeline did not drain within {:?}", DRAIN_TIMEOUT);
    }
    let _ = sweeper_task.await;

    info!("🛑 Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
