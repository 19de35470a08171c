//! Process-scoped transport context.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Loopback address every endpoint binds or connects to.
pub const LOOPBACK: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Default linger applied when closing sockets.
pub const DEFAULT_LINGER: Duration = Duration::from_secs(1);

/// Shared state for every endpoint and listener in one process.
///
/// Cloning is cheap; all clones refer to the same context. Create one at
/// startup, hand it to each endpoint constructor, and call
/// [`TransportContext::terminate`] during teardown.
#[derive(Debug, Clone)]
pub struct TransportContext {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    token: CancellationToken,
    linger: Duration,
}

impl TransportContext {
    /// Create a live context whose sockets close with the given linger.
    #[must_use]
    pub fn new(linger: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                linger,
            }),
        }
    }

    /// Terminate the context. Idempotent.
    pub fn terminate(&self) {
        if !self.inner.token.is_cancelled() {
            debug!("transport context terminated");
        }
        self.inner.token.cancel();
    }

    /// Whether [`terminate`](Self::terminate) has been called.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Resolves once the context is terminated.
    pub async fn terminated(&self) {
        self.inner.token.cancelled().await;
    }

    /// A token cancelled when the context terminates, or earlier on its own.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.inner.token.child_token()
    }

    /// Upper bound on how long a closing socket may spend flushing.
    #[must_use]
    pub fn linger(&self) -> Duration {
        self.inner.linger
    }

    /// Loopback socket address for `port`.
    #[must_use]
    pub fn address(port: u16) -> SocketAddr {
        SocketAddr::from((LOOPBACK, port))
    }
}

impl Default for TransportContext {
    fn default() -> Self {
        Self::new(DEFAULT_LINGER)
    }
}
