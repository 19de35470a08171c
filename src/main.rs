#![forbid(unsafe_code)]

//! `appvisor`: application-process supervisor binary.
//!
//! Loads a TOML configuration, launches every configured app in its own
//! worker process, logs lifecycle events, and tears everything down on
//! Ctrl-C / SIGTERM or once every app has exited.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use appvisor::{AppError, AppEvent, Result, Supervisor, SupervisorConfig};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "appvisor", about = "Application-process supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Launch every configured app and supervise until shutdown.
    Run,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(async move {
            match args.command {
                Command::Run => run(args.config).await,
            }
        })
}

async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = match config_path {
        Some(path) => SupervisorConfig::load_from_path(path)?,
        None => SupervisorConfig::default(),
    };
    info!(apps = config.apps.len(), "configuration loaded");

    let supervisor = Supervisor::start(&config)?;
    let mut events = supervisor.subscribe();

    let mut live = 0usize;
    for entry in &config.apps {
        match supervisor
            .launch_app(
                entry.id.clone(),
                &entry.module,
                &entry.function,
                entry.args.clone(),
            )
            .await
        {
            Ok(true) => live += 1,
            Ok(false) => warn!(app_id = %entry.id, "duplicate app id skipped"),
            Err(err) => error!(app_id = %entry.id, %err, "failed to launch app"),
        }
    }

    if live == 0 {
        warn!("no apps running");
    } else {
        info!(live, "supervising");
        tokio::select! {
            () = shutdown_signal() => info!("shutdown signal received"),
            () = all_terminated(&mut events, live) => info!("all apps have exited"),
        }
    }

    supervisor.shutdown().await;
    info!("appvisor shut down");
    Ok(())
}

/// Log lifecycle events until `live` apps have terminated.
async fn all_terminated(events: &mut broadcast::Receiver<AppEvent>, mut live: usize) {
    while live > 0 {
        match events.recv().await {
            Ok(AppEvent::Launched { id, port, pid }) => {
                info!(app_id = %id, port, pid = pid.unwrap_or(0), "app launched");
            }
            Ok(AppEvent::Terminated { id, port, exit_code }) => {
                info!(app_id = %id, port, ?exit_code, "app terminated");
                live -= 1;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "lifecycle events lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
