//! Connecting side of a supervisor ↔ worker request/reply pair.
//!
//! An [`Endpoint`] owns at most one TCP connection to a worker listener on
//! `127.0.0.1:<port>`. The connection is established lazily: the first
//! round trip retries the connect at [`CONNECT_RETRY_INTERVAL`] until the
//! connect deadline passes, so the worker may bind after the endpoint has
//! been created.
//!
//! Round trips are strictly alternating. The connection sits behind an
//! async mutex held for the whole send-then-receive exchange, so
//! concurrent callers on the same endpoint queue instead of interleaving.
//! The connection is only returned to the endpoint once a reply has been
//! decoded, so a failed or abandoned round trip drops it and the next round
//! trip reconnects.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::transport::context::TransportContext;
use crate::wire::codec::{fits_in_frame, WireCodec, MAX_FRAME_BYTES};
use crate::wire::protocol::{
    decode_reply, encode_frame, Probe, ProbeAck, Reply, ReplyFrame, Request, RequestFrame,
};
use crate::{AppError, Result};

/// Delay between connect attempts while the worker has not bound yet.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(20);

type Connection = Framed<TcpStream, WireCodec>;

/// Timing knobs for one endpoint.
#[derive(Debug, Clone, Copy)]
pub struct EndpointOptions {
    /// How long a round trip keeps retrying the initial connect.
    pub connect_timeout: Duration,
    /// Per-round-trip deadline; `None` waits for the reply indefinitely.
    pub request_timeout: Option<Duration>,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: None,
        }
    }
}

/// Connecting RPC handle for one worker.
#[derive(Debug)]
pub struct Endpoint {
    addr: SocketAddr,
    options: EndpointOptions,
    linger: Duration,
    close: CancellationToken,
    conn: Mutex<Option<Connection>>,
}

impl Endpoint {
    /// Create an endpoint for the worker listening on `port`.
    ///
    /// No I/O happens here; the connection is opened by the first round trip.
    #[must_use]
    pub fn new(ctx: &TransportContext, port: u16, options: EndpointOptions) -> Self {
        Self {
            addr: TransportContext::address(port),
            options,
            linger: ctx.linger(),
            close: ctx.child_token(),
            conn: Mutex::new(None),
        }
    }

    /// Socket address this endpoint talks to.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether the endpoint or its context has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled()
    }

    /// Send the liveness probe and report whether the answer was `"pong"`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] on connection failure and
    /// [`AppError::Closed`] once the endpoint has been closed.
    pub async fn ping(&self) -> Result<bool> {
        let answer = self.round_trip(&RequestFrame::Probe(Probe::Ping)).await?;
        Ok(answer == ReplyFrame::Ack(ProbeAck::Pong))
    }

    /// Send a request triple and wait for the reply.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] on connection failure or timeout,
    /// [`AppError::Protocol`] if the worker answers a request with `"pong"`,
    /// and [`AppError::Closed`] once the endpoint has been closed.
    pub async fn request(&self, request: Request) -> Result<Reply> {
        match self.round_trip(&RequestFrame::Message(request)).await? {
            ReplyFrame::Reply(reply) => Ok(reply),
            ReplyFrame::Ack(_) => Err(AppError::Protocol(
                "worker answered a request with a probe acknowledgement".into(),
            )),
        }
    }

    /// Close the endpoint: fail any waiting round trip, then shut the
    /// connection down within the context linger. Idempotent.
    pub async fn close(&self) {
        self.close.cancel();
        let mut guard = self.conn.lock().await;
        if let Some(mut conn) = guard.take() {
            match tokio::time::timeout(self.linger, SinkExt::<String>::close(&mut conn)).await {
                Ok(Ok(())) => debug!(addr = %self.addr, "endpoint closed"),
                Ok(Err(err)) => debug!(addr = %self.addr, %err, "endpoint close failed"),
                Err(_) => debug!(addr = %self.addr, "endpoint linger elapsed"),
            }
        }
    }

    async fn round_trip(&self, frame: &RequestFrame) -> Result<ReplyFrame> {
        if self.is_closed() {
            return Err(AppError::Closed(format!("endpoint {} is closed", self.addr)));
        }
        let line = encode_frame(frame)?;
        if !fits_in_frame(&line) {
            return Err(AppError::Protocol(format!(
                "request of {} bytes exceeds the {MAX_FRAME_BYTES}-byte frame limit",
                line.len()
            )));
        }

        let mut guard = self.conn.lock().await;
        // Owned by the exchange until a reply decodes; an abandoned round trip drops it.
        let cached = guard.take();
        let exchange = async move {
            let mut conn = match cached {
                Some(conn) => conn,
                None => self.connect().await?,
            };
            conn.send(line).await?;
            let reply = match conn.next().await {
                Some(Ok(reply_line)) => decode_reply(&reply_line)?,
                Some(Err(err)) => return Err(err),
                None => {
                    return Err(AppError::Transport(format!(
                        "connection to {} closed before reply",
                        self.addr
                    )))
                }
            };
            Ok((conn, reply))
        };

        let outcome = tokio::select! {
            () = self.close.cancelled() => {
                Err(AppError::Closed(format!("endpoint {} closed while waiting for reply", self.addr)))
            }
            result = with_deadline(self.options.request_timeout, exchange) => result,
        };

        let (conn, reply) = outcome?;
        *guard = Some(conn);
        Ok(reply)
    }

    async fn connect(&self) -> Result<Connection> {
        let deadline = Instant::now() + self.options.connect_timeout;
        loop {
            match TcpStream::connect(self.addr).await {
                Ok(stream) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        warn!(addr = %self.addr, %err, "failed to set TCP_NODELAY");
                    }
                    debug!(addr = %self.addr, "endpoint connected");
                    return Ok(Framed::new(stream, WireCodec::new()));
                }
                Err(err) if Instant::now() >= deadline => {
                    return Err(AppError::Transport(format!(
                        "failed to connect to {} within {:?}: {err}",
                        self.addr, self.options.connect_timeout
                    )));
                }
                Err(_) => tokio::time::sleep(CONNECT_RETRY_INTERVAL).await,
            }
        }
    }
}

async fn with_deadline<T, F>(deadline: Option<Duration>, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| AppError::Transport(format!("no reply within {limit:?}")))?,
        None => fut.await,
    }
}
