use service_core::error::AppError;
use service_core::observability::{init_metrics, init_tracing};
use session_service::{
    build_router,
    config::SessionServiceConfig,
    services::{
        spawn_expiry_sweeper, Database, PasswordCredentials, RedisService, SessionManager,
        SessionPolicy,
    },
    AppState,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Fail fast on invalid configuration
    let config = SessionServiceConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );
    init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting session service"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.session.store_timeout())
        .connect(&config.database.url)
        .await?;
    let db = Arc::new(Database::new(pool));
    db.migrate().await?;
    tracing::info!("Database initialized successfully");

    let redis = RedisService::new(&config.redis).await?;
    tracing::info!("Redis service initialized");

    let sessions = SessionManager::new(
        db.clone(),
        Arc::new(redis),
        SessionPolicy::from(&config.session),
    );
    let credentials = Arc::new(PasswordCredentials::new(db.clone()));

    let sweeper = spawn_expiry_sweeper(
        sessions.clone(),
        Duration::from_secs(config.session.sweep_interval_seconds),
    );

    let state = AppState::new(config.clone(), sessions, credentials);
    let app = build_router(state);

    let addr = config.common.socket_addr();

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
