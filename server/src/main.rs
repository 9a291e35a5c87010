// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Firma Server
//!
//! Entry point for the `firma-server` binary. Parses CLI arguments,
//! initializes logging and metrics, opens the credential service, and serves
//! the HTTP API.
//!
//! Subcommands:
//!
//! - `run`     - start the API and metrics listeners
//! - `init`    - create the storage layout under the data directory
//! - `version` - print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;

use firma_core::config::StorageLayout;
use firma_core::CredentialService;

use cli::{Commands, FirmaServerCli};
use logging::LogFormat;
use metrics::ServerMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = FirmaServerCli::parse();

    match cli.command {
        Commands::Run(args) => run_server(args).await,
        Commands::Init(args) => init_storage(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Opens storage and serves the API and metrics endpoints until shutdown.
async fn run_server(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        logging::DEFAULT_DIRECTIVES,
        LogFormat::from_str_lossy(&args.log_format),
    );

    tracing::info!(
        port = args.port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        backend = ?args.record_backend,
        "starting firma-server"
    );

    // --- Credential service ---
    let config = args.to_config();
    let service = CredentialService::open(config).with_context(|| {
        format!(
            "failed to open credential service at {}",
            args.data_dir.display()
        )
    })?;

    // --- Metrics ---
    let server_metrics = Arc::new(ServerMetrics::new());

    // --- API server ---
    let app_state = api::AppState {
        service: Arc::new(service),
        metrics: Arc::clone(&server_metrics),
    };
    let api_router = api::create_router(app_state);
    let api_addr = format!("{}:{}", args.bind, args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&server_metrics));
    let metrics_addr = format!("{}:{}", args.bind, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    tracing::info!("firma-server stopped");
    Ok(())
}

/// Creates every storage directory so a later `run` starts clean.
fn init_storage(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("firma_server=info", LogFormat::Pretty);

    let layout = StorageLayout::new(&args.data_dir);
    layout
        .initialize()
        .with_context(|| format!("failed to initialize {}", args.data_dir.display()))?;

    tracing::info!(data_dir = %args.data_dir.display(), "storage layout initialized");

    println!("Storage initialized successfully.");
    println!("  Data directory : {}", layout.root().display());
    println!("  User records   : {}", layout.users_dir().display());
    println!("  Credentials    : {}", layout.credentials_dir().display());
    println!("  Signed PDFs    : {}", layout.documents_dir().display());
    println!("  Database       : {}", layout.database_dir().display());

    Ok(())
}

fn print_version() {
    println!("firma-server {}", env!("CARGO_PKG_VERSION"));
    println!("rustc        {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// If a handler cannot be installed, that signal is simply never observed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
