#![forbid(unsafe_code)]

//! `appvisor-runner`: hosts one app on a loopback port.
//!
//! Invoked by the supervisor as
//! `appvisor-runner <port> <module> <function> [args...]`. Resolves the app
//! in the built-in registry, serves requests until the app's display closes
//! (Ctrl-C / SIGTERM), and exits.

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use appvisor::apps::{parse_args, AppRegistry};
use appvisor::transport::context::TransportContext;
use appvisor::worker::host::{run_app, DisplayHandle};
use appvisor::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "appvisor-runner", about = "Host one app worker", version, long_about = None)]
struct Cli {
    /// Loopback port to listen on.
    port: u16,

    /// App module name.
    module: String,

    /// App function name.
    function: String,

    /// Extra arguments passed to the app (JSON values or plain strings).
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
        .inspect_err(|err| error!(%err, "runner failed"))
}

async fn run(args: Cli) -> Result<()> {
    let registry = AppRegistry::builtin();
    let setup = registry.resolve(&args.module, &args.function)?;
    let app = setup(&parse_args(&args.args))?;
    info!(
        port = args.port,
        module = %args.module,
        function = %args.function,
        "app ready"
    );

    tokio::spawn(close_on_signal(app.display.clone()));

    let ctx = TransportContext::default();
    run_app(app, args.port, &ctx).await
}

async fn close_on_signal(display: DisplayHandle) {
    shutdown_signal().await;
    info!("shutdown signal received, closing display");
    display.close();
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
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

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
