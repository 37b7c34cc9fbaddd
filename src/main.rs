use std::sync::Arc;

use onboarding_orchestrator::clock::{Clock, SystemClock};
use onboarding_orchestrator::config::{
    ContentConfig, ConsumerConfig, LeagueConfig, OrchestratorConfig, ServerConfig,
};
use onboarding_orchestrator::onboarding::{
    OnboardingConsumer, OnboardingDeps, OnboardingRouteState, Orchestrator, onboarding_routes,
};
use onboarding_orchestrator::store::{Database, LibSqlBackend};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // ── Config ──────────────────────────────────────────────────────────
    let orchestrator_config = OrchestratorConfig::from_env();
    orchestrator_config.validate()?;
    let consumer_config = ConsumerConfig::from_env();
    consumer_config.validate()?;
    let league_config = LeagueConfig::from_env();
    league_config.validate()?;
    let content_config = ContentConfig::from_env();
    let server_config = ServerConfig::from_env();

    // ── Database ────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&server_config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {}",
                    server_config.db_path.display(),
                    e
                );
                std::process::exit(1);
            }),
    );

    // ── Onboarding ──────────────────────────────────────────────────────
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let deps = OnboardingDeps::store_backed(
        Arc::clone(&db),
        Arc::clone(&clock),
        league_config,
        content_config,
    );
    let orchestrator = Arc::new(Orchestrator::new(orchestrator_config, deps));
    let consumer =
        OnboardingConsumer::new(orchestrator, Arc::clone(&db), Arc::clone(&clock), consumer_config);
    let (publisher, consumer_handle) = consumer.spawn();

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = onboarding_routes(OnboardingRouteState {
        db,
        publisher,
        clock,
    })
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", server_config.port)).await?;
    tracing::info!(
        port = server_config.port,
        db = %server_config.db_path.display(),
        "Onboarding server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutdown requested");
        })
        .await?;

    // Router (and its publisher) are gone; wait for queued and in-flight runs.
    consumer_handle.await?;
    Ok(())
}
