//! Decision Survey service binary

use decision_survey::api::{create_router, AppState};
use decision_survey::{
    register_builtins, ChannelTransport, CustomMatcherRegistry, Database, DatabaseStorage,
    EngineConfig, EngineContext, Matcher, ServiceConfig, SessionListenerRegistry,
    SessionManager, TimeoutSweeper, TreeCatalog,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "decision_survey=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    // Configuration
    let service = ServiceConfig::from_env()?;
    let engine = EngineConfig::from_env()?;
    tracing::info!(
        timeout_secs = engine.timeout_seconds,
        notifications = engine.notifications_enabled,
        end_trigger = ?engine.session_end_trigger,
        "Engine configured"
    );

    // Ensure database directory exists
    if let Some(parent) = service.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Initialize database
    tracing::info!(path = %service.db_path.display(), "Opening database");
    let db = Database::open(&service.db_path)?;

    // Load trees and check every custom answer has a predicate
    let custom_matchers = Arc::new(CustomMatcherRegistry::new());
    register_builtins(&custom_matchers)?;
    let catalog = TreeCatalog::load(&service.trees_path)?;
    catalog.validate_custom_matchers(&custom_matchers)?;
    tracing::info!(
        path = %service.trees_path.display(),
        trees = catalog.trees().len(),
        "Tree catalog loaded"
    );
    tracing::info!(matchers = ?custom_matchers.names(), "Custom matchers registered");

    let timeout = engine.timeout();
    let context = EngineContext::new(Arc::new(catalog), Matcher::new(custom_matchers), engine);
    let transport = ChannelTransport::new(1024);
    let manager = Arc::new(
        SessionManager::new(
            context,
            DatabaseStorage::new(db.clone()),
            Arc::new(transport.clone()),
            Arc::new(SessionListenerRegistry::new()),
        )
        .with_idle_timeout(service.runtime_idle),
    );

    // Start the timeout sweeper
    let shutdown = CancellationToken::new();
    let sweeper = Arc::new(TimeoutSweeper::new(
        Arc::clone(&manager),
        timeout,
        service.sweep_interval,
    ));
    let sweeper_task = sweeper.start(shutdown.clone());

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = AppState::new(manager, transport, db);
    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], service.port));
    tracing::info!("Decision survey server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    sweeper_task.await?;
    Ok(())
}
