use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use site_gate::logging::init_tracing;
use site_gate::{AppState, Config, build_router, metrics, prerender, utils};

/// Content site server with a hardened request pipeline.
#[derive(Parser)]
#[command(name = "site_gate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the site (default)
    Serve,

    /// Render paths through the router into static files
    Prerender {
        /// Output directory
        #[arg(short, long, default_value = "dist")]
        out: PathBuf,

        /// Paths to render (e.g. "/" "/about")
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging is configured from the environment, so config comes first.
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };
    init_tracing(&config);

    info!("Starting site_gate v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Prerender { out, paths } => run_prerender(config, out, paths).await,
    };

    match result {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Run the server, returning an exit code on error.
async fn serve(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        site_root = %config.site_root.display(),
        environment = %config.environment,
        "Configuration loaded"
    );

    if let Some(metrics_addr) = config.metrics_addr() {
        metrics::try_init_metrics(metrics_addr);
    } else {
        info!("Metrics endpoint disabled (METRICS_PORT=0)");
    }

    let state = AppState::new(config.clone());
    let app = build_router(state.clone()).map_err(|e| {
        error!("Failed to build router: {e}");
        exitcode::CONFIG
    })?;

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("  GET  /health   - Health check");
    info!("  GET  /*        - Static site");

    // Peer addresses feed trusted-proxy validation.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Render `paths` into `out`, returning an exit code on error.
async fn run_prerender(
    config: Config,
    out: PathBuf,
    paths: Vec<String>,
) -> Result<(), exitcode::ExitCode> {
    let state = AppState::new(config);
    let app = build_router(state.clone()).map_err(|e| {
        error!("Failed to build router: {e}");
        exitcode::CONFIG
    })?;

    let result = prerender(app, &paths, &out).await;
    state.shutdown().await;

    let summary = result.map_err(|e| {
        error!("Prerender failed: {e}");
        match e {
            site_gate::AppError::Io(_) => exitcode::IOERR,
            _ => exitcode::USAGE,
        }
    })?;

    info!(
        rendered = summary.rendered.len(),
        failed = summary.failed.len(),
        out = %out.display(),
        "Prerender complete"
    );

    if summary.is_success() {
        Ok(())
    } else {
        for page in &summary.failed {
            warn!(path = %page.path, reason = %page.reason, "Page not rendered");
        }
        Err(exitcode::DATAERR)
    }
}
