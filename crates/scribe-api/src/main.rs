// scribed: content-ingestion service
//
// One process hosting the tus upload surface, the durable job worker, and
// the health endpoint, over three SQLite datastores.

mod common;
mod config;
mod dossiers;
mod health;
mod identity;
mod tus;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

use scribe_durable::{
    recover_at_boot, JobStore, SqliteJobStore, Worker, WorkerConfig, DEFAULT_OVERDUE_THRESHOLD,
};
use scribe_ingest::{
    build_registry, HandlerDeps, HttpOcrClient, IngestController, PopplerPdfTools, UploadManager,
};
use scribe_storage::{
    open_pool, spawn_heartbeat_writer, Database, ObservabilityStore, TraceStore,
};

use config::AppConfig;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        dossiers::create_dossier,
        dossiers::get_dossier,
        dossiers::delete_dossier,
        health::health,
    ),
    components(schemas(
        dossiers::CreateDossierRequest,
        dossiers::DossierResponse,
        health::HealthResponse,
        health::ServiceHealth,
    )),
    tags(
        (name = "dossiers", description = "Dossier management endpoints"),
        (name = "health", description = "Liveness reporting")
    ),
    info(
        title = "Scribe API",
        description = "Resumable ingestion and OCR workflow service",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scribe=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("scribed starting...");

    let config = AppConfig::from_env();
    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .context("create data dir")?;
    tokio::fs::create_dir_all(&config.ingest.chunks_dir)
        .await
        .context("create chunks dir")?;
    tokio::fs::create_dir_all(&config.ingest.work_dir)
        .await
        .context("create work dir")?;

    // Open the three datastores. Jobs live in the main file and share its
    // pool, so each file keeps exactly one writer.
    let main_pool = open_pool(&config.main_db_url())
        .await
        .context("open main datastore")?;
    let db = Database::with_pool(main_pool.clone())
        .await
        .context("init main schema")?;
    let queue: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::with_pool(main_pool)
            .await
            .context("init job queue schema")?,
    );
    let trace = TraceStore::from_url(&config.trace_db_url())
        .await
        .context("open trace datastore")?;
    let observability = ObservabilityStore::from_url(&config.observability_db_url())
        .await
        .context("open observability datastore")?;
    tracing::info!(data_dir = %config.data_dir.display(), "Datastores ready");

    // Recover whatever the previous process left mid-flight, before any
    // dispatcher claims work
    let report = recover_at_boot(&*queue, DEFAULT_OVERDUE_THRESHOLD)
        .await
        .context("recover interrupted jobs")?;
    tracing::info!(
        stale_running = report.stale_running,
        overdue_retrying = report.overdue_retrying,
        "Boot recovery done"
    );

    // Receiving uploads past the TTL stay resumable; just report them
    let ttl = chrono::Duration::from_std(config.ingest.upload_ttl)
        .unwrap_or_else(|_| chrono::Duration::days(7));
    let stale_uploads = db
        .list_stale_uploads(chrono::Utc::now() - ttl)
        .await
        .context("scan stale uploads")?;
    if !stale_uploads.is_empty() {
        tracing::warn!(count = stale_uploads.len(), "Abandoned receiving uploads");
    }

    // Worker with the ingestion step handlers
    let deps = HandlerDeps {
        db: db.clone(),
        trace: trace.clone(),
        pdf: Arc::new(PopplerPdfTools::new()),
        ocr: Arc::new(HttpOcrClient::new(config.ingest.ocr_base_url.clone())),
        work_dir: config.ingest.work_dir.clone(),
    };
    let registry = build_registry(deps, config.ingest.concurrency);
    let worker = Worker::new(queue.clone(), registry, WorkerConfig::default());
    worker.start();

    // Liveness writers ride on the worker's shutdown signal
    for service in ["api", "worker"] {
        let _ = spawn_heartbeat_writer(
            observability.clone(),
            service.to_string(),
            config.heartbeat_interval,
            Arc::new(|| json!({"version": env!("CARGO_PKG_VERSION")})),
            worker.shutdown_signal(),
        );
    }

    let manager = UploadManager::new(
        db.clone(),
        config.ingest.chunks_dir.clone(),
        config.ingest.max_upload_size,
    );
    let controller = IngestController::new(db.clone(), queue.clone(), observability.clone());

    // Build router
    let app = Router::new()
        .merge(health::routes(health::AppState {
            observability: observability.clone(),
            heartbeat_interval: config.heartbeat_interval,
        }))
        .merge(tus::routes(tus::AppState {
            manager,
            controller,
        }))
        .merge(dossiers::routes(dossiers::AppState {
            db: db.clone(),
            chunks_dir: config.ingest.chunks_dir.clone(),
        }))
        .route("/api-doc/openapi.json", get(openapi))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // Drain in-flight handlers; whatever remains is recovered next boot
    worker.shutdown().await;
    tracing::info!("scribed stopped");
    Ok(())
}

async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Shutdown signal received");
}
