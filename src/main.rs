use std::sync::Arc;

use anyhow::Context;

use task_allocator::allocator::AssignmentAllocator;
use task_allocator::api;
use task_allocator::config::AppConfig;
use task_allocator::labeling::{HttpLabelingClient, LabelingService};
use task_allocator::pool::TaskPoolClient;
use task_allocator::pusher::UpstreamPusher;
use task_allocator::recorder::AssignmentRecorder;
use task_allocator::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("loading configuration")?;

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("opening database at {}", config.db_path.display()))?,
    );

    // ── Labeling service ─────────────────────────────────────────────────
    let labeling: Arc<dyn LabelingService> = Arc::new(
        HttpLabelingClient::new(&config.labeling).context("building labeling client")?,
    );

    let allocator = Arc::new(AssignmentAllocator::new(
        TaskPoolClient::new(Arc::clone(&labeling), config.labeling.clone()),
        UpstreamPusher::new(Arc::clone(&labeling)),
        AssignmentRecorder::new(Arc::clone(&db)),
        Arc::clone(&db),
    ));

    let app = api::routes(allocator, db);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;

    tracing::info!(
        port = config.port,
        labeling = %config.labeling.base_url,
        db = %config.db_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Task allocator listening"
    );
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
