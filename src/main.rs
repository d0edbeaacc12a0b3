//! fleetcert - device certificate signing and lifecycle service
//!
//! Receives lifecycle events over HTTP and drives the signing, expiry and
//! acknowledgment workflows against the device registry, message broker and
//! CA credential store.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

use fleetcert::config::{LogFormat, LogTarget, LoggingConfig, TlsConfig};
use fleetcert::db::{self, IssuanceRepository};
use fleetcert::services::credentials::object_store_from_config;
use fleetcert::services::{
    HttpBroker, HttpDeviceRegistry, LifecycleOrchestrator, OrchestratorSettings,
    StoreCredentialProvider,
};
use fleetcert::{api, AppConfig, AppState};

/// Time allowed for in-flight events to finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("fleetcert {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration first (before logging, so we know log format)
    let config = AppConfig::load().context("Failed to load configuration")?;

    // The guard flushes file logs on drop and must live until exit
    let _log_guard = init_logging(&config.logging);

    info!("fleetcert {} starting up", env!("CARGO_PKG_VERSION"));

    let orchestrator = build_orchestrator(&config).await?;

    let state = AppState {
        config: config.clone(),
        orchestrator: Arc::new(orchestrator),
    };
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address configuration")?;

    if let Some(ref tls_config) = config.server.tls {
        info!("Starting HTTPS server on https://{}", addr);
        let rustls_config = create_rustls_config(tls_config)?;

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown_handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        axum_server::bind_rustls(addr, rustls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("HTTPS server error")?;
    } else {
        info!("Starting HTTP server on http://{}", addr);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .context("Failed to bind to address")?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server error")?;
    }

    info!("fleetcert stopped");
    Ok(())
}

/// Wire the collaborators named in configuration into an orchestrator
async fn build_orchestrator(config: &AppConfig) -> Result<LifecycleOrchestrator> {
    let store = object_store_from_config(&config.object_store)
        .context("Failed to initialize object store")?;
    let credentials = Arc::new(StoreCredentialProvider::new(store));

    info!("Initializing device registry client: {}", config.registry.endpoint.url);
    let registry = Arc::new(
        HttpDeviceRegistry::new(&config.registry)
            .context("Failed to initialize device registry client")?,
    );

    info!("Initializing message broker client: {}", config.broker.endpoint.url);
    let broker = Arc::new(
        HttpBroker::new(&config.broker).context("Failed to initialize message broker client")?,
    );

    let orchestrator = LifecycleOrchestrator::new(
        OrchestratorSettings::from_config(config),
        credentials,
        registry,
        broker,
    );

    if !config.ledger.enabled {
        info!("Issuance ledger disabled; redelivered signing requests mint new certificates");
        return Ok(orchestrator);
    }

    ensure_data_directory(&config.ledger.database_url)?;
    info!("Opening issuance ledger: {}", config.ledger.database_url);
    let pool = db::init_pool(&config.ledger)
        .await
        .context("Failed to initialize issuance ledger")?;
    Ok(orchestrator.with_ledger(IssuanceRepository::new(pool)))
}

/// Create the application router with tracing applied
fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    api::router(state).layer(trace_layer)
}

/// Build the rustls server configuration
fn create_rustls_config(tls_config: &TlsConfig) -> Result<axum_server::tls_rustls::RustlsConfig> {
    use axum_server::tls_rustls::RustlsConfig;
    use rustls::crypto::aws_lc_rs::default_provider;
    use rustls::pki_types::pem::PemObject;
    use rustls::pki_types::{CertificateDer, PrivateKeyDer};

    let certs = CertificateDer::pem_file_iter(&tls_config.cert_file)
        .with_context(|| format!("Failed to open certificate file: {:?}", tls_config.cert_file))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to read certificates: {:?}", tls_config.cert_file))?;
    if certs.is_empty() {
        anyhow::bail!("No certificates found in {:?}", tls_config.cert_file);
    }

    let key = PrivateKeyDer::from_pem_file(&tls_config.key_file)
        .with_context(|| format!("Failed to read private key: {:?}", tls_config.key_file))?;

    let versions: Vec<&'static rustls::SupportedProtocolVersion> =
        match tls_config.min_version.as_str() {
            "1.3" => vec![&rustls::version::TLS13],
            _ => vec![&rustls::version::TLS12, &rustls::version::TLS13],
        };
    info!("TLS minimum version: {}", tls_config.min_version);

    let mut server_config = rustls::ServerConfig::builder_with_provider(Arc::new(default_provider()))
        .with_protocol_versions(&versions)
        .context("Failed to set TLS protocol versions")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Failed to build TLS server config")?;
    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(RustlsConfig::from_config(Arc::new(server_config)))
}

/// Resolve on Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining in-flight events");
}

/// Initialize the logging/tracing infrastructure
fn init_logging(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{prelude::*, EnvFilter, Layer, Registry};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if matches!(config.target, LogTarget::Console | LogTarget::Both) {
        layers.push(format_layer(&config.format, std::io::stdout));
    }

    let guard = if matches!(config.target, LogTarget::File | LogTarget::Both) {
        let (writer, guard) = create_file_writer(config);
        layers.push(format_layer(&config.format, writer));
        Some(guard)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();
    guard
}

/// One formatting layer writing to `writer`
fn format_layer<W>(
    format: &LogFormat,
    writer: W,
) -> Box<dyn tracing_subscriber::Layer<tracing_subscriber::Registry> + Send + Sync>
where
    W: for<'w> tracing_subscriber::fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    use tracing_subscriber::{fmt, Layer};

    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(writer)
            .boxed(),
    }
}

/// Create a file writer with optional daily rotation
fn create_file_writer(
    config: &LoggingConfig,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    if let Err(e) = std::fs::create_dir_all(&config.log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            config.log_dir, e
        );
    }

    let file_appender = if config.daily_rotation {
        tracing_appender::rolling::daily(&config.log_dir, &config.log_prefix)
    } else {
        tracing_appender::rolling::never(&config.log_dir, &config.log_prefix)
    };

    tracing_appender::non_blocking(file_appender)
}

/// Create the ledger's parent directory for file-backed SQLite URLs
fn ensure_data_directory(database_url: &str) -> Result<()> {
    if let Some(path) = database_url.strip_prefix("sqlite://") {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create data directory")?;
                info!("Created data directory: {:?}", parent);
            }
        }
    }
    Ok(())
}

fn print_help() {
    println!(
        "fleetcert {}

Device certificate signing and lifecycle service.

USAGE:
    fleetcert [OPTIONS]

OPTIONS:
    -h, --help       Print this help
    -V, --version    Print version

ENVIRONMENT:
    FLEETCERT_CONFIG       Path to the YAML configuration file
    FLEETCERT_HOST         Listen address
    FLEETCERT_PORT         Listen port
    CA_CRED_PATH           CA credential locator (<scheme>:::<container>/<key>)
    OBJECT_STORE_URL       HTTP object store holding the CA credential
    OBJECT_STORE_ROOT      Filesystem object store root (instead of the URL)
    REGISTRY_URL           Device registry endpoint
    REGISTRY_POLICY_NAME   Policy attached to registered certificates
    REGISTRY_CERT_PREFIX   Principal prefix for certificate ids
    BROKER_URL             Message broker endpoint
    LEDGER_DATABASE_URL    Enable the issuance ledger at this SQLite URL
    RUST_LOG               Log filter
    FLEETCERT_LOG_FORMAT   pretty | compact | json
    FLEETCERT_LOG_TARGET   console | file | both
    FLEETCERT_LOG_DIR      Directory for log files",
        env!("CARGO_PKG_VERSION")
    );
}
