use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use compliance_assistant::build_router;
use compliance_assistant::config::{Settings, StorageBackend};
use compliance_assistant::database::{DbPool, MemoryStorage, PgStorage, Storage};
use compliance_assistant::logging::ActivityLogger;
use compliance_assistant::services::background::JobHandler;
use compliance_assistant::services::{
    spawn_workers, BackgroundQueue, EmbeddingService, LanguageModel, LlmService, LogNotifier,
    Notifier, Orchestrator, OrchestratorConfig, SmtpNotifier,
};
use compliance_assistant::state::AppState;
use compliance_assistant::utils::logger::init_logger;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_logger()?;

    info!("🚀 Starting Compliance Assistant...");

    // Load configuration
    let settings = Settings::load()?;
    info!("✅ Configuration loaded");

    let storage: Arc<dyn Storage> = match settings.database.backend {
        StorageBackend::Postgres => {
            let pool = DbPool::connect(&settings.database).await?;
            let storage = PgStorage::new(pool, settings.embedding.dimension);
            storage
                .ensure_schema()
                .await
                .context("Failed to prepare database schema")?;
            info!("✅ Database connection established");
            Arc::new(storage)
        }
        StorageBackend::Memory => {
            warn!("Using in-memory storage; conversations are lost on restart");
            Arc::new(MemoryStorage::new())
        }
    };

    let embeddings = EmbeddingService::new(settings.embedding.clone());
    let model: Arc<dyn LanguageModel> = Arc::new(LlmService::new(settings.llm.clone(), embeddings));

    let notifier: Arc<dyn Notifier> = match &settings.escalation.smtp {
        Some(smtp) => Arc::new(SmtpNotifier::new(smtp)?),
        None => {
            info!("SMTP not configured, escalations are only logged");
            Arc::new(LogNotifier)
        }
    };

    let logger = ActivityLogger::new(storage.clone(), settings.activity_log.clone());
    let (queue, receiver) = BackgroundQueue::bounded(settings.background.queue_capacity);

    let orchestrator = Arc::new(Orchestrator::new(
        storage,
        model,
        queue,
        logger.clone(),
        OrchestratorConfig::from_settings(&settings),
    ));

    let processor: Arc<dyn JobHandler> = Arc::new(orchestrator.background_processor(notifier));
    let _workers = spawn_workers(receiver, processor, settings.background.clone(), logger);
    info!("✅ Background workers started");

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));

    let app = build_router(AppState { orchestrator });

    info!("🎯 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
