//! Clan Armory Server
//!
//! REST API server and reclaim sweeper for clan armories.

use axum::{
    routing::{delete, get, post},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clan_armory::{
    api,
    config::AppConfig,
    repository::Repository,
    services::{
        clock::SystemClock,
        events::{BroadcastEventSink, FanoutEventSink, TracingEventSink},
        Services,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("clan_armory={},tower_http=debug", config.logging.level).into());

    if config.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting Clan Armory v{}", env!("CARGO_PKG_VERSION"));

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await?;

    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!("Database migrations completed");

    // Save server address before moving config
    let server_host = config.server.host.clone();
    let server_port = config.server.port;

    // Events go to the log and to in-process subscribers
    let broadcast = BroadcastEventSink::new(1024);
    let events = FanoutEventSink::new()
        .with(Arc::new(TracingEventSink))
        .with(Arc::new(broadcast));

    // Create repository and services
    let repository = Repository::new(pool.clone());
    let services = Services::new(
        repository,
        &config.armory,
        Arc::new(SystemClock),
        Arc::new(events),
    );

    // Start the reclaim sweeper
    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(services.sweeper.clone().run(shutdown.clone()));

    // Create application state
    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
        pool,
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(server_host.parse()?, server_port);

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    sweeper.await?;

    tracing::info!("Clan Armory stopped");
    Ok(())
}

/// Resolve on Ctrl-C, cancelling background work
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
    shutdown.cancel();
}

/// Create the application router with all routes
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API v1 routes
    let api_v1 = Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        .route("/ready", get(api::health::readiness_check))
        // Armory
        .route("/clans/:clan_id/armory", get(api::armory::list_armory))
        .route("/clans/:clan_id/armory", post(api::armory::offer_item))
        .route(
            "/clans/:clan_id/armory/:item_instance_id/borrow",
            post(api::armory::borrow_item),
        )
        .route("/armory/sweep", post(api::armory::run_sweep))
        .route("/armory/:item_instance_id", delete(api::armory::withdraw_offer))
        .route("/armory/:item_instance_id/return", post(api::armory::return_item))
        .route("/armory/:item_instance_id/touch", post(api::armory::touch_loan))
        // Collaborator hooks
        .route(
            "/clans/:clan_id/members/:user_id/armory",
            delete(api::armory::purge_member),
        )
        .route(
            "/item-types/:item_type_id/disable",
            post(api::armory::disable_item_type),
        )
        .with_state(state);

    // OpenAPI documentation
    let openapi = api::openapi::create_openapi_router();

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
