//! Conexus server binary: stdio MCP by default, HTTP alongside when an
//! address is configured. Logging goes to stderr; stdout is the JSON-RPC
//! channel.

use anyhow::{Context, Result};
use clap::Parser;
use conexus_server::{dispatch, http, AppState, Config};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "conexus", version, about = "Context retrieval MCP server")]
struct Args {
    /// Path to config.json / config.yaml (defaults to auto-discovery).
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config, e.g. 127.0.0.1:8080).
    #[arg(long)]
    http_addr: Option<String>,

    /// Serve HTTP only; do not read JSON-RPC from stdin.
    #[arg(long)]
    no_stdio: bool,

    /// Persist sessions and caches under ~/.conexus when no state_dir is
    /// configured.
    #[arg(long)]
    persist: bool,
}

fn main() -> ExitCode {
    // CONEXUS_LOG mirrors RUST_LOG for deployments that namespace their
    // environment; stderr keeps stdout clean for the protocol.
    let log_env = env_logger::Env::default()
        .filter_or("CONEXUS_LOG", "info")
        .write_style("CONEXUS_LOG_STYLE");
    env_logger::Builder::from_env(log_env)
        .target(env_logger::Target::Stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("startup failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("load configuration")?;
    if let Some(addr) = args.http_addr {
        config.http_addr = Some(addr);
    }
    if args.persist && config.state_dir.is_none() {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        config.state_dir = Some(home.join(".conexus"));
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    runtime.block_on(serve(config, args.no_stdio))
}

async fn serve(config: Config, no_stdio: bool) -> Result<()> {
    let http_addr = config
        .http_addr
        .clone()
        .map(|raw| {
            raw.parse::<std::net::SocketAddr>()
                .with_context(|| format!("invalid http_addr '{raw}'"))
        })
        .transpose()?;

    let state = AppState::from_config(config).context("initialise server state")?;
    state.start_background();
    log::info!(
        "conexus {} ready ({} connectors, {} tools)",
        env!("CARGO_PKG_VERSION"),
        state.connectors.list().len(),
        state.tools.list().len()
    );

    let mut http_task = None;
    if let Some(addr) = http_addr {
        http_task = Some(http::spawn_http(Arc::clone(&state), addr)?);
    }

    let shutdown = state.shutdown.clone();
    let signal_state = Arc::clone(&state);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received, shutting down");
            signal_state.shutdown.cancel();
        }
    });

    if no_stdio {
        match http_task.take() {
            Some(task) => task.await.context("join HTTP task")?,
            None => shutdown.cancelled().await,
        }
    } else {
        dispatch::run_stdio(Arc::clone(&state), tokio::io::stdin(), tokio::io::stdout())
            .await
            .context("stdio loop")?;
        shutdown.cancel();
        if let Some(task) = http_task.take() {
            task.await.context("join HTTP task")?;
        }
    }

    if let Err(err) = state.persist_now() {
        log::warn!("state persistence on shutdown failed: {err:#}");
    }
    log::info!("conexus stopped");
    Ok(())
}
