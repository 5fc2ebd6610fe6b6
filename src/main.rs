use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use whale_sentinel_agent::agent::gateway::GatewayClient;
use whale_sentinel_agent::agent::profile_store::ProfileStore;
use whale_sentinel_agent::agent::synchronizer::GatewaySynchronizer;
use whale_sentinel_agent::config::settings::LoggingConfig;
use whale_sentinel_agent::config::Settings;
use whale_sentinel_agent::protection::rate_limiter::RateLimiter;
use whale_sentinel_agent::protection::telemetry::{HostTelemetry, StaticTelemetry, SystemTelemetry};
use whale_sentinel_agent::storage::SqliteStorage;
use whale_sentinel_agent::{protect, Collaborators, ProtectionPipeline};

/// Parse the `--config` CLI flag. Defaults to `config/agent.toml`.
fn parse_config_path() -> String {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = String::from("config/agent.toml");

    let mut i = 1;
    while i < args.len() {
        if args[i] == "--config" {
            if let Some(path) = args.get(i + 1) {
                config_path = path.clone();
            }
            i += 2;
        } else {
            i += 1;
        }
    }

    config_path
}

/// Daily rotation, keeping at most `max_files` files in `directory`.
fn log_file_appender(logging: &LoggingConfig) -> anyhow::Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(logging.file_prefix.as_str())
        .max_log_files(logging.max_files.max(1))
        .build(&logging.directory)
        .with_context(|| format!("failed to open log directory {}", logging.directory))
}

/// Initialise the `tracing` subscriber with stdout and a rolling file.
/// The returned guard must be held for the life of the process.
fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<WorkerGuard> {
    let file_appender = log_file_appender(logging)?;
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},whale_sentinel_agent={}", logging.level, logging.level))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Periodically sweeps expired rate-limit counters.
async fn cleanup_loop(rate_limiter: Arc<RateLimiter>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let removed = rate_limiter.cleanup();
        if removed > 0 {
            tracing::debug!(removed = removed, remaining = rate_limiter.len(), "rate limiter cleanup");
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    #[serde(default)]
    query: String,
}

async fn search(Json(req): Json<SearchRequest>) -> Json<Value> {
    Json(json!({
        "query": req.query,
        "results": [],
    }))
}

async fn health() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---------------------------------------------------------------
    // 1. Configuration
    // ---------------------------------------------------------------
    let config_path = parse_config_path();
    let settings = Settings::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path))?;

    // ---------------------------------------------------------------
    // 2. Logging
    // ---------------------------------------------------------------
    let _log_guard = init_tracing(&settings.logging)?;

    info!("Starting Whale Sentinel agent");
    info!("Config loaded from {}", config_path);

    // ---------------------------------------------------------------
    // 3. Storage
    // ---------------------------------------------------------------
    let storage = Arc::new(
        SqliteStorage::open(&settings.storage.sqlite_path)
            .context("failed to open metadata storage")?,
    );
    info!(pending = storage.pending_count()?, "Storage layer initialised");

    // ---------------------------------------------------------------
    // 4. Gateway and profile
    // ---------------------------------------------------------------
    let identity = settings.identity();
    let gateway = Arc::new(GatewayClient::new(&identity, &settings.gateway)?);

    let profiles = Arc::new(ProfileStore::new());
    if let Err(e) = profiles.refresh(gateway.as_ref()).await {
        warn!(error = %e, "initial profile fetch failed, starting without a profile");
    }
    let refresh_handle = tokio::spawn(profiles.clone().run_refresh_loop(
        gateway.clone(),
        Duration::from_secs(settings.gateway.profile_refresh_secs.max(1)),
    ));

    // ---------------------------------------------------------------
    // 5. Protection pipeline
    // ---------------------------------------------------------------
    let telemetry: Arc<dyn HostTelemetry> = if settings.telemetry.enabled {
        Arc::new(SystemTelemetry::new(&settings.telemetry))
    } else {
        Arc::new(StaticTelemetry::from_process(settings.telemetry.host_ip.clone()))
    };

    let synchronizer = Arc::new(GatewaySynchronizer::new(
        storage.clone(),
        gateway.clone(),
        profiles.clone(),
        settings.gateway.sync_batch_size,
    ));

    let pipeline = Arc::new(ProtectionPipeline::new(
        &settings,
        Collaborators {
            profiles: profiles.clone(),
            detection: gateway.clone(),
            storage: storage.clone(),
            synchronizer,
            telemetry,
        },
    )?);

    let cleanup_handle = tokio::spawn(cleanup_loop(
        pipeline.rate_limiter(),
        Duration::from_secs(settings.rate_limit.cleanup_interval_secs.max(1)),
    ));

    // ---------------------------------------------------------------
    // 6. HTTP server
    // ---------------------------------------------------------------
    let app = Router::new()
        .route("/api/v1/search", post(search))
        .route_layer(from_fn_with_state(pipeline.clone(), protect))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&settings.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.server.bind))?;
    info!("Whale Sentinel agent listening on {}", settings.server.bind);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for shutdown signal");
        }
        info!("Shutting down Whale Sentinel agent...");
    })
    .await?;

    // ---------------------------------------------------------------
    // 7. Shutdown
    // ---------------------------------------------------------------
    refresh_handle.abort();
    cleanup_handle.abort();
    pipeline.shutdown().await;

    info!("Whale Sentinel agent shut down gracefully");
    Ok(())
}
