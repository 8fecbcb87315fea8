//! OSD Remove Controller - declarative OSD removal for rook-managed Ceph clusters
//!
//! This application stores removal tasks, reconciles them in the background
//! against the Ceph and Kubernetes APIs, and exposes a small HTTP API to create,
//! approve and inspect them.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tokio::sync::Notify;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use config::LogFormat;
use osd_remove_controller::{
    api, config, db,
    services::{
        start_reconciler, Backends, DiskDaemonClient, KubeClusterApi, Reconciler, TaskSettings,
        ToolboxCli,
    },
    AppConfig, AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("OSD Remove Controller {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    if let Some(pos) = args.iter().position(|arg| arg == "--write-default-config") {
        let path = args
            .get(pos + 1)
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| std::path::PathBuf::from("config.yaml"));
        AppConfig::create_default_config(&path)?;
        println!("Default configuration written to {:?}", path);
        return Ok(());
    }

    // Load configuration first (before logging, so we know log format)
    let config = AppConfig::load().context("Failed to load configuration")?;

    let _log_guard = init_logging(&config);

    info!("OSD Remove Controller starting up");

    ensure_data_directory(&config)?;

    let pool = db::init_pool(&config.database)
        .await
        .context("Failed to initialize database")?;
    info!("Database initialized");

    let settings = TaskSettings::from_config(&config)?;
    let cluster = KubeClusterApi::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let disks = DiskDaemonClient::new(&config.disk_daemon, settings.retry)?;
    let backends = Backends {
        ceph: Arc::new(ToolboxCli::new(&config.ceph_cli)),
        disks: Arc::new(disks),
        cluster: Arc::new(cluster),
    };

    let wake = Arc::new(Notify::new());
    let reconciler = Reconciler::new(db::TaskRepository::new(pool.clone()), backends, settings);
    let scheduler = start_reconciler(Arc::new(reconciler), wake.clone());

    let state = AppState {
        config: config.clone(),
        db: pool,
        reconcile_wake: wake,
    };
    let app = create_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address configuration")?;

    info!("Starting HTTP server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    scheduler.stop().await;
    info!("OSD Remove Controller stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

type BoxedLayer = Box<dyn tracing_subscriber::Layer<tracing_subscriber::Registry> + Send + Sync>;

/// Initialize the logging/tracing infrastructure
///
/// The returned guard flushes the file writer and must outlive the program.
fn init_logging(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use config::LogTarget;
    use tracing_subscriber::{prelude::*, EnvFilter};

    let mut env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if let Some(ref level) = config.task.log_level {
        let directive = format!("osd_remove_controller::services::osd_remove={}", level);
        match directive.parse() {
            Ok(directive) => env_filter = env_filter.add_directive(directive),
            Err(e) => eprintln!("Warning: Ignoring invalid task log level '{}': {}", level, e),
        }
    }

    let log_config = &config.logging;
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guard = None;

    if matches!(log_config.target, LogTarget::Console | LogTarget::Both) {
        layers.push(fmt_layer(&log_config.format, None));
    }
    if matches!(log_config.target, LogTarget::File | LogTarget::Both) {
        let (writer, file_guard) = create_file_writer(log_config);
        layers.push(fmt_layer(&log_config.format, Some(writer)));
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();
    guard
}

/// Formatting layer for the console, or for `writer` when given
fn fmt_layer(
    format: &LogFormat,
    writer: Option<tracing_appender::non_blocking::NonBlocking>,
) -> BoxedLayer {
    use tracing_subscriber::{fmt, Layer};

    let ansi = writer.is_none();
    match (format, writer) {
        (LogFormat::Json, Some(writer)) => fmt::layer().json().with_writer(writer).boxed(),
        (LogFormat::Json, None) => fmt::layer().json().boxed(),
        (LogFormat::Compact, Some(writer)) => fmt::layer()
            .compact()
            .with_target(false)
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
        (LogFormat::Compact, None) => fmt::layer().compact().with_target(false).boxed(),
        (LogFormat::Pretty, Some(writer)) => fmt::layer().with_ansi(ansi).with_writer(writer).boxed(),
        (LogFormat::Pretty, None) => fmt::layer().with_thread_ids(false).boxed(),
    }
}

/// Create a file writer with optional daily rotation
fn create_file_writer(
    log_config: &config::LoggingConfig,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    if let Err(e) = std::fs::create_dir_all(&log_config.log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            log_config.log_dir, e
        );
    }

    let file_appender = if log_config.daily_rotation {
        tracing_appender::rolling::daily(&log_config.log_dir, &log_config.log_prefix)
    } else {
        tracing_appender::rolling::never(&log_config.log_dir, &log_config.log_prefix)
    };

    tracing_appender::non_blocking(file_appender)
}

/// Ensure the data directory exists
fn ensure_data_directory(config: &AppConfig) -> Result<()> {
    if let Some(path) = config.database.url.strip_prefix("sqlite://") {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create data directory")?;
                info!("Created data directory: {:?}", parent);
            }
        }
    }
    Ok(())
}

/// Create the application router with all routes and middleware
fn create_router(state: AppState, config: &AppConfig) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let timeout = Duration::from_secs(config.server.request_timeout_secs.unwrap_or(30));

    Router::new()
        .nest("/api/v1", api::routes())
        .with_state(state)
        .layer(TimeoutLayer::new(timeout))
        .layer(trace_layer)
}

/// Print help message
fn print_help() {
    println!(
        r#"OSD Remove Controller {}

USAGE:
    osd-remove-controller [OPTIONS]

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information
    --write-default-config [PATH]
                            Write the default configuration to PATH
                            (default: config.yaml) and exit

ENVIRONMENT:
    OSDRM_CONFIG        Path to configuration file (default: config.yaml)

CONFIGURATION:
    The application looks for configuration files in the following order:
    1. Path specified by OSDRM_CONFIG environment variable
    2. ./config.yaml
    3. ./config/config.yaml
    4. /etc/osd-remove-controller/config.yaml"#,
        env!("CARGO_PKG_VERSION")
    );
}
