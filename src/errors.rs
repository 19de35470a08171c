//! Error types shared across the supervisor and the worker runner.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all supervisor and worker failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// The worker process could not be spawned.
    Spawn(String),
    /// The worker process did not become ready (exited early or missed the deadline).
    Startup(String),
    /// Connection, framing, or context failure on an RPC endpoint.
    Transport(String),
    /// A frame was well-formed but did not match the expected message shape.
    Protocol(String),
    /// Requested app id does not exist.
    NotFound(String),
    /// No free port remains above the configured base.
    PortExhausted(String),
    /// The supervisor has been shut down.
    Closed(String),
    /// App lookup or setup failure inside the worker runner.
    App(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Startup(msg) => write!(f, "startup: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::PortExhausted(msg) => write!(f, "port exhausted: {msg}"),
            Self::Closed(msg) => write!(f, "closed: {msg}"),
            Self::App(msg) => write!(f, "app: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(format!("malformed json: {err}"))
    }
}
