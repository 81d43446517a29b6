mod auth;
mod config;
mod db;
mod docs;
mod handlers;
mod models;
mod routes;
mod services;
mod websocket;
mod ws;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use config::Config;
use docs::ApiDoc;
use routes::create_api_routes;
use std::panic;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use ws::hub::{Hub, HubHandle};
use ws::session::{spawn_session_writer, SessionTracker};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub sessions: SessionTracker,
    pub jwt_secret: Option<Arc<str>>,
    pub queue_capacity: usize,
}

impl AppState {
    pub fn new(hub: HubHandle, sessions: SessionTracker, jwt_secret: Option<&str>, queue_capacity: usize) -> Self {
        Self {
            hub,
            sessions,
            jwt_secret: jwt_secret.map(Arc::from),
            queue_capacity,
        }
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins()
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Wait for Ctrl-C, then stop the hub so every open socket gets closed.
async fn shutdown_signal(hub: HubHandle) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
    hub.shutdown();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Load configuration before tracing so LOG_LEVEL can drive the filter
    let loaded = Config::load();
    let app_level = match &loaded {
        Ok(config) => config.log_level.clone(),
        Err(_) => "debug".to_string(),
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, with the configured level for our app
            format!("sitehub={},tower_http=debug,axum::rejection=trace,info", app_level).into()
        }))
        .init();

    info!("Starting server...");

    let config = match loaded {
        Ok(config) => {
            info!("✅ Configuration loaded successfully");
            config
        }
        Err(e) => {
            error!("❌ Failed to load configuration: {}", e);
            warn!("Using default configuration");
            Config::default()
        }
    };
    info!("Environment: {} (development: {})", config.environment, config.is_development());

    // Initialize database connection if URL is provided
    if let Some(db_url) = &config.db_url {
        match db::dbsession::init_db(db_url).await {
            Ok(_) => info!("Database initialized successfully"),
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                warn!("Sessions will only be tracked in memory");
            }
        }
    } else {
        warn!("No database URL configured - sessions will only be tracked in memory");
    }

    if config.auth_jwt_secret.is_none() {
        warn!("AUTH_JWT_SECRET is not set - protected endpoints will reject every request");
    }

    // Start the hub control loop and the stale-session sweep
    let (hub, hub_task) = Hub::spawn();
    let mut sessions = SessionTracker::new(config.session_stale_after());
    let mut writer_task = None;
    if let Some(db) = db::dbsession::get_db() {
        let (writes, task) = spawn_session_writer(db);
        sessions = sessions.with_writes(writes);
        writer_task = Some(task);
    }
    let sweep_task = sessions.spawn_sweep(hub.clone(), config.session_sweep_interval());

    let state = AppState::new(
        hub.clone(),
        sessions,
        config.auth_jwt_secret.as_deref(),
        config.outbound_queue_capacity,
    );

    // Combine all routes
    let app_routes = Router::new()
        // Mount API routes
        .nest("/api", create_api_routes(state))
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config));

    // Start the HTTP/API server
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 WebSocket available at ws://{}/api/v1/ws", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    axum::serve(listener, app_routes)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await
        .expect("Server failed to start");

    if let Err(e) = hub_task.await {
        error!("Hub control loop failed: {}", e);
    }
    sweep_task.abort();
    if let Some(task) = writer_task {
        // The writer stops once every tracker clone is gone.
        if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
            warn!("Session writer did not drain before shutdown");
        }
    }
    info!("Server stopped");
}
