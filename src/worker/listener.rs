//! Worker-side listener: owns the bound socket and serves one request at a time.
//!
//! ```text
//! Idle → AwaitingRequest ─┬─ "ping" ─────────────────────────→ Replying → Idle
//!                          └─ request → Dispatching → AwaitingReply → Replying → Idle
//!                    (any state) ── quit / context terminated ──→ Interrupted
//! ```
//!
//! Requests are handed to the worker's primary context as a [`DispatchJob`]
//! carrying a single-slot `oneshot` for the reply; the listener suspends on
//! that slot and does not read the next frame until the reply has been
//! written. The `"ping"` probe is answered here without a dispatch.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::transport::context::TransportContext;
use crate::wire::codec::{fits_in_frame, WireCodec, MAX_FRAME_BYTES};
use crate::wire::protocol::{
    decode_request, encode_frame, Failure, FailureKind, ProbeAck, Reply, ReplyFrame, Request,
    RequestFrame,
};
use crate::{AppError, Result};

/// Observable listener state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Between requests, or waiting for a connection.
    Idle,
    /// Connected and waiting for the next frame.
    AwaitingRequest,
    /// Handing a request to the primary context.
    Dispatching,
    /// Waiting for the primary context to fill the reply slot.
    AwaitingReply,
    /// Writing the reply frame.
    Replying,
    /// Stopped; terminal.
    Interrupted,
}

/// A request handed from the listener to the worker's primary context.
#[derive(Debug)]
pub struct DispatchJob {
    /// The request triple.
    pub request: Request,
    /// Single-slot reply channel the primary context must fill.
    pub reply: oneshot::Sender<Reply>,
}

/// Bound, not yet running listener.
#[derive(Debug)]
pub struct Listener {
    tcp: TcpListener,
    ctx: TransportContext,
}

/// Handle to a running listener task.
#[derive(Debug)]
pub struct ListenerHandle {
    addr: SocketAddr,
    quit: CancellationToken,
    state: watch::Receiver<ListenerState>,
    join: JoinHandle<()>,
}

enum ConnectionOutcome {
    Closed,
    Interrupted,
}

impl Listener {
    /// Bind to `127.0.0.1:port`. Port `0` picks an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the port cannot be bound.
    pub async fn bind(ctx: &TransportContext, port: u16) -> Result<Self> {
        let addr = TransportContext::address(port);
        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|err| AppError::Transport(format!("failed to bind {addr}: {err}")))?;
        Ok(Self {
            tcp,
            ctx: ctx.clone(),
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the OS cannot report the address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.tcp.local_addr()?)
    }

    /// Start serving on a background task, forwarding requests to `jobs`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the bound address cannot be read.
    pub fn spawn(self, jobs: mpsc::Sender<DispatchJob>) -> Result<ListenerHandle> {
        let addr = self.local_addr()?;
        let quit = self.ctx.child_token();
        let (state_tx, state_rx) = watch::channel(ListenerState::Idle);

        let task_quit = quit.clone();
        let span = info_span!("listener", %addr);
        let join = tokio::spawn(
            async move {
                info!("listener accepting connections");
                self.run(jobs, &task_quit, &state_tx).await;
                state_tx.send_replace(ListenerState::Interrupted);
                info!("listener stopped");
            }
            .instrument(span),
        );

        Ok(ListenerHandle {
            addr,
            quit,
            state: state_rx,
            join,
        })
    }

    async fn run(
        self,
        jobs: mpsc::Sender<DispatchJob>,
        quit: &CancellationToken,
        state: &watch::Sender<ListenerState>,
    ) {
        loop {
            state.send_replace(ListenerState::Idle);
            let accepted = tokio::select! {
                biased;
                () = quit.cancelled() => return,
                accepted = self.tcp.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(%err, "accept failed");
                    continue;
                }
            };
            debug!(%peer, "supervisor connected");

            match serve_connection(stream, &jobs, quit, state, self.ctx.linger()).await {
                ConnectionOutcome::Closed => debug!(%peer, "supervisor disconnected"),
                ConnectionOutcome::Interrupted => return,
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    jobs: &mpsc::Sender<DispatchJob>,
    quit: &CancellationToken,
    state: &watch::Sender<ListenerState>,
    linger: std::time::Duration,
) -> ConnectionOutcome {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(%err, "failed to set TCP_NODELAY");
    }
    let mut framed = Framed::new(stream, WireCodec::new());

    let outcome = loop {
        state.send_replace(ListenerState::AwaitingRequest);
        let next = tokio::select! {
            biased;
            () = quit.cancelled() => break ConnectionOutcome::Interrupted,
            next = framed.next() => next,
        };

        let line = match next {
            None => break ConnectionOutcome::Closed,
            Some(Err(err)) => {
                warn!(%err, "failed to read frame, dropping connection");
                break ConnectionOutcome::Closed;
            }
            Some(Ok(line)) => line,
        };

        let answer = match decode_request(&line) {
            Ok(RequestFrame::Probe(_)) => ReplyFrame::Ack(ProbeAck::Pong),
            Ok(RequestFrame::Message(request)) => {
                match dispatch(request, jobs, quit, state).await {
                    Some(reply) => ReplyFrame::Reply(reply),
                    None => break ConnectionOutcome::Interrupted,
                }
            }
            Err(err) => {
                warn!(%err, "unparseable request");
                ReplyFrame::Reply(Reply::Err(Failure::new(
                    FailureKind::BadRequest,
                    err.to_string(),
                )))
            }
        };

        state.send_replace(ListenerState::Replying);
        let sent = match encode_answer(&answer) {
            Ok(out) => framed.send(out).await,
            Err(err) => Err(err),
        };
        if let Err(err) = sent {
            warn!(%err, "failed to send reply, dropping connection");
            break ConnectionOutcome::Closed;
        }
        state.send_replace(ListenerState::Idle);
    };

    if matches!(outcome, ConnectionOutcome::Interrupted) {
        if tokio::time::timeout(linger, SinkExt::<String>::close(&mut framed)).await.is_err() {
            debug!("socket linger elapsed");
        }
    }
    outcome
}

/// Encode `answer`, replacing it with a `reply_too_large` failure when the
/// line would not fit in the supervisor's frame limit.
fn encode_answer(answer: &ReplyFrame) -> Result<String> {
    let line = encode_frame(answer)?;
    if fits_in_frame(&line) {
        return Ok(line);
    }
    warn!(bytes = line.len(), "reply exceeds frame limit");
    encode_frame(&ReplyFrame::Reply(Reply::failure(
        FailureKind::ReplyTooLarge,
        format!(
            "reply of {} bytes exceeds the {MAX_FRAME_BYTES}-byte frame limit",
            line.len()
        ),
    )))
}

/// Hand `request` to the primary context and wait for its reply.
///
/// Returns `None` if the listener is interrupted while waiting.
async fn dispatch(
    request: Request,
    jobs: &mpsc::Sender<DispatchJob>,
    quit: &CancellationToken,
    state: &watch::Sender<ListenerState>,
) -> Option<Reply> {
    state.send_replace(ListenerState::Dispatching);
    let (reply_tx, reply_rx) = oneshot::channel();
    let job = DispatchJob {
        request,
        reply: reply_tx,
    };

    let queued = tokio::select! {
        biased;
        () = quit.cancelled() => return None,
        queued = jobs.send(job) => queued,
    };
    if queued.is_err() {
        return Some(Reply::failure(
            FailureKind::App,
            "worker is shutting down; request was not dispatched",
        ));
    }

    state.send_replace(ListenerState::AwaitingReply);
    tokio::select! {
        biased;
        () = quit.cancelled() => None,
        reply = reply_rx => Some(reply.unwrap_or_else(|_| {
            Reply::failure(FailureKind::App, "request was dropped before a reply was produced")
        })),
    }
}

impl ListenerHandle {
    /// Address the listener is bound to.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ListenerState {
        *self.state.borrow()
    }

    /// Watch channel receiving every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ListenerState> {
        self.state.clone()
    }

    /// Ask the listener to stop at its next suspension point.
    pub fn quit(&self) {
        self.quit.cancel();
    }

    /// Whether the listener task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the listener task to finish.
    pub async fn join(self) {
        if let Err(err) = self.join.await {
            warn!(%err, "listener task failed");
        }
    }
}
