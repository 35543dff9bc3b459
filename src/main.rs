//! sandbox-supervisor — entry point
//!
//! Loads configuration, verifies sandbox artifacts are present, and serves
//! the single-route HTTP surface described in spec.md §6.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use sandbox_supervisor::config::Settings;
use sandbox_supervisor::gate::RequestGate;
use sandbox_supervisor::runner::Runner;
use sandbox_supervisor::server::{self, AppState};

#[derive(Debug, Parser)]
#[command(name = "sandbox-supervisor")]
#[command(about = "Single-tenant sandbox supervisor", long_about = None)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv); logs go to stderr (and to
    /// `debug_log_file`, if configured).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;
    init_tracing(cli.verbose, settings.debug_log_file.as_deref());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(settings))
}

async fn serve(settings: Settings) -> Result<()> {
    let runner = Runner::new(
        settings.paths.clone(),
        settings.timeout,
        settings.max_output_bytes,
        settings.instance_ram.clone(),
    )?;
    let gate = std::sync::Arc::new(RequestGate::new(settings.paths.request_lock()));

    let app = server::router(AppState { runner, gate });
    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!(addr = %settings.bind_addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing(verbosity: u8, debug_log_file: Option<&std::path::Path>) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match debug_log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "sandbox-supervisor.log".to_string());
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            // Leaked deliberately: the guard must outlive the process, and
            // the process has no graceful-shutdown path that would drop it.
            std::mem::forget(guard);
            let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr_layer).init();
        }
    }
}
