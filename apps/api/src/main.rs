use std::net::SocketAddr;
use std::sync::Arc;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{CorsLayer, Any};
use tower_http::trace::{self, TraceLayer};
use tracing::{Level, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::{AppointmentBookingService, SlotLocks};
use audit_cell::{AuditDispatcher, LogCollectionSink, TracingAuditSink};
use shared_config::AppConfig;
use shared_database::{ConnectOptions, ConnectionRegistry, DatabaseLocator};
use tenant_cell::TenantRegistry;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Clinic API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    // Connections and tenants
    let connections = Arc::new(ConnectionRegistry::new(ConnectOptions::from_config(&config)));
    let directory = DatabaseLocator::new(config.directory_url.clone(), config.directory_database.clone());
    let tenants = Arc::new(TenantRegistry::new(connections.clone(), directory));

    // Audit trail goes to the log and to each tenant's log collection
    let audit = AuditDispatcher::default()
        .with_sink(Arc::new(TracingAuditSink))
        .with_sink(Arc::new(LogCollectionSink::new(tenants.clone())));

    let booking = Arc::new(AppointmentBookingService::new(&config, SlotLocks::new(), audit));

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = router::AppState {
        config: config.clone(),
        tenants,
        booking,
    };

    // Build the application router
    let app = router::create_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new()
                    .level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new()
                    .level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!("Listening on {}", addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    connections.close_all().await;
    info!("All tenant connections closed");
}
