//! Scribe server - capture supervisor and ingestion gateway for
//! AI-assistant CLI sessions.

use anyhow::Result;
use axum::{
    http::{HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use clap::Parser;
use scribe_server::{config::Config, logging, routes, state::AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use logging::{LogConfig, LogFormat};

/// Scribe server - session capture and ingestion.
#[derive(Parser, Debug)]
#[command(name = "scribe-server")]
#[command(about = "Capture supervisor and ingestion gateway for assistant CLI sessions")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override port from config
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging (INFO level for most targets)
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging (TRACE level for everything)
    #[arg(long)]
    trace: bool,

    /// Quiet mode (WARN and ERROR only)
    #[arg(short, long)]
    quiet: bool,

    /// Set log level for specific targets (e.g., "gateway=debug").
    /// Can be specified multiple times. Targets are prefixed with
    /// "scribe::" automatically.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_cli(
        cli.verbose,
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    logging::init(&log_config);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(port) = cli.port {
        config.port = port;
    }

    tracing::info!(target: "scribe::startup", "Loaded configuration (port: {})", config.port);

    let state = Arc::new(AppState::new(config.clone())?);
    state.spawn_forwarder();
    tracing::info!(target: "scribe::startup", "Initialized application state");

    let app = build_router(state, &config)?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(target: "scribe::startup", "Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: Arc<AppState>, config: &Config) -> Result<Router> {
    let api_routes = Router::new()
        .route("/hooks", post(routes::hooks::receive))
        .route(
            "/sessions",
            get(routes::sessions::list).post(routes::sessions::spawn),
        )
        .route("/sessions/{id}", delete(routes::sessions::stop))
        .route("/sessions/{id}/events", get(routes::sessions::events))
        .route("/health", get(routes::health));

    // CORS is restricted to the configured origins; an empty list keeps
    // the gateway same-origin only.
    let origins = config
        .allowed_origins
        .iter()
        .map(|o| o.parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()?;
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    Ok(Router::new()
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}
