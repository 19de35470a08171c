//! Worker primary context: owns the coordinator and drives the listener.
//!
//! The listener runs on its own task; the task calling [`run_app`] is the
//! primary context and the only place coordinator state is touched. Requests
//! cross between the two through a bounded queue and per-request reply
//! slots. The app runs until its [`DisplayHandle`] reports closed.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::transport::context::TransportContext;
use crate::worker::coordinator::Coordinator;
use crate::worker::dispatcher::Dispatcher;
use crate::worker::listener::{DispatchJob, Listener, ListenerHandle};
use crate::Result;

/// Stand-in for the app's window: something that can be closed and that
/// others can wait on.
#[derive(Debug, Clone, Default)]
pub struct DisplayHandle {
    closed: CancellationToken,
}

impl DisplayHandle {
    /// A fresh, open display.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the display. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether the display has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the display is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}

/// A coordinator paired with its display, as produced by an app setup function.
pub struct HostedApp {
    /// Top-level stateful object.
    pub coordinator: Box<dyn Coordinator>,
    /// Display whose closure ends the worker.
    pub display: DisplayHandle,
}

impl HostedApp {
    /// Pair a coordinator with a fresh display.
    #[must_use]
    pub fn new(coordinator: Box<dyn Coordinator>) -> Self {
        Self {
            coordinator,
            display: DisplayHandle::new(),
        }
    }
}

/// Serve `app` on `127.0.0.1:port` until its display closes.
///
/// Terminates `ctx` before returning.
///
/// # Errors
///
/// Returns [`AppError::Transport`](crate::AppError::Transport) if the port
/// cannot be bound.
pub async fn run_app(app: HostedApp, port: u16, ctx: &TransportContext) -> Result<()> {
    let listener = Listener::bind(ctx, port).await?;
    let (jobs_tx, jobs_rx) = mpsc::channel(1);
    let handle = listener.spawn(jobs_tx)?;
    info!(addr = %handle.addr(), "app server started");

    serve(app, jobs_rx, &handle)
        .instrument(info_span!("primary", port))
        .await;

    handle.quit();
    handle.join().await;
    ctx.terminate();
    info!("app server stopped");
    Ok(())
}

/// Primary-context loop: run dispatch jobs until the display closes or the
/// listener goes away.
pub async fn serve(app: HostedApp, mut jobs: mpsc::Receiver<DispatchJob>, listener: &ListenerHandle) {
    let HostedApp {
        coordinator,
        display,
    } = app;
    let mut dispatcher = Dispatcher::new(coordinator);

    loop {
        tokio::select! {
            biased;
            () = display.closed() => {
                info!("display closed, stopping");
                break;
            }
            job = jobs.recv() => {
                let Some(DispatchJob { request, reply }) = job else {
                    warn!(addr = %listener.addr(), "listener stopped unexpectedly");
                    break;
                };
                let answer = dispatcher.dispatch(request);
                if reply.send(answer).is_err() {
                    warn!("listener dropped the reply slot");
                }
            }
        }
    }
}
