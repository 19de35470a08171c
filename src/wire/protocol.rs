//! Message shapes exchanged between the supervisor and a worker.
//!
//! ## Wire format
//!
//! Every frame is one JSON document on one line (see [`super::codec`]).
//!
//! Supervisor → worker:
//! ```json
//! "ping"
//! ["", "setInput", {"dataIn": [1, 2, 3]}]
//! ["scale", "factor", 2.5]
//! ```
//!
//! Worker → supervisor:
//! ```json
//! "pong"
//! {"ok": true}
//! {"err": {"kind": "unknown_node", "message": "no node named 'scale'", "trace": []}}
//! ```
//!
//! The liveness probe is a bare JSON string so the listener can answer it
//! without touching the dispatcher. Application replies always carry an
//! explicit `ok` / `err` discriminant.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Target names that address the worker's top-level coordinator.
pub const COORDINATOR_ALIASES: [&str; 3] = ["", "fc", "flowchart"];

/// Coordinator property that applies a mapping of named inputs.
pub const SET_INPUT: &str = "setInput";

/// Coordinator property that queries the current output values.
pub const GET_OUTPUT: &str = "getOutput";

/// Liveness probe sent by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Probe {
    /// Encoded as the JSON string `"ping"`.
    Ping,
}

/// Liveness probe answer sent by the worker listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeAck {
    /// Encoded as the JSON string `"pong"`.
    Pong,
}

/// Application request: `(target_name, target_property, value)`.
///
/// Serialised as a three-element JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request(pub String, pub String, pub Value);

impl Request {
    /// Build a request triple.
    #[must_use]
    pub fn new(target_name: impl Into<String>, target_property: impl Into<String>, value: Value) -> Self {
        Self(target_name.into(), target_property.into(), value)
    }

    /// Name of the addressed object (coordinator alias or node name).
    #[must_use]
    pub fn target_name(&self) -> &str {
        &self.0
    }

    /// Property to set or query on the target.
    #[must_use]
    pub fn target_property(&self) -> &str {
        &self.1
    }

    /// Payload value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.2
    }

    /// Whether the request addresses the coordinator rather than a node.
    #[must_use]
    pub fn targets_coordinator(&self) -> bool {
        COORDINATOR_ALIASES.contains(&self.0.as_str())
    }

    /// Consume the request, returning its parts.
    #[must_use]
    pub fn into_parts(self) -> (String, String, Value) {
        (self.0, self.1, self.2)
    }
}

/// Any frame the worker listener can read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestFrame {
    /// `"ping"` fast path.
    Probe(Probe),
    /// Request triple routed to the dispatcher.
    Message(Request),
}

/// Category of a failure-valued reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The coordinator does not support the requested property.
    UnsupportedProperty,
    /// No node with the requested name exists.
    UnknownNode,
    /// The node has no settable property with the requested name.
    UnknownProperty,
    /// The value has the wrong shape or type for the target.
    InvalidValue,
    /// The frame could not be parsed as a request.
    BadRequest,
    /// Coordinator or node code panicked while handling the request.
    Panic,
    /// The request was applied but its reply does not fit in one frame.
    ReplyTooLarge,
    /// Any other failure raised by app code.
    App,
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::UnsupportedProperty => "unsupported property",
            Self::UnknownNode => "unknown node",
            Self::UnknownProperty => "unknown property",
            Self::InvalidValue => "invalid value",
            Self::BadRequest => "bad request",
            Self::Panic => "panic",
            Self::ReplyTooLarge => "reply too large",
            Self::App => "app error",
        };
        f.write_str(label)
    }
}

/// Serialised description of a failure that happened inside a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// Failure category.
    pub kind: FailureKind,
    /// Human-readable description.
    pub message: String,
    /// Cause chain, outermost first. Empty when the failure has no source.
    #[serde(default)]
    pub trace: Vec<String>,
}

impl Failure {
    /// Build a failure without a cause chain.
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            trace: Vec::new(),
        }
    }

    /// Build a failure from an error, recording its `source()` chain.
    #[must_use]
    pub fn from_error(kind: FailureKind, err: &(dyn std::error::Error + 'static)) -> Self {
        let mut trace = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            trace.push(cause.to_string());
            source = cause.source();
        }
        Self {
            kind,
            message: err.to_string(),
            trace,
        }
    }

    /// Render the failure and its cause chain as a multi-line string for logs.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("{}: {}", self.kind, self.message);
        for (depth, cause) in self.trace.iter().enumerate() {
            out.push_str(&format!("\n  {depth}: caused by: {cause}"));
        }
        out
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Failure {}

/// Reply to an application request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reply {
    /// The request succeeded; carries the produced value.
    Ok(Value),
    /// The request failed inside the worker; carries the failure as data.
    Err(Failure),
}

impl Reply {
    /// `Reply::Ok(true)`, the answer to a successful node property set.
    #[must_use]
    pub fn success() -> Self {
        Self::Ok(Value::Bool(true))
    }

    /// Shorthand for a failure reply.
    #[must_use]
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Err(Failure::new(kind, message))
    }

    /// Whether the reply carries a value.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Whether the reply carries a failure.
    #[must_use]
    pub fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// Borrow the value of an `Ok` reply.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Ok(value) => Some(value),
            Self::Err(_) => None,
        }
    }

    /// Borrow the failure of an `Err` reply.
    #[must_use]
    pub fn failure_ref(&self) -> Option<&Failure> {
        match self {
            Self::Ok(_) => None,
            Self::Err(failure) => Some(failure),
        }
    }
}

/// Any frame the supervisor can read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReplyFrame {
    /// `"pong"` answer to a probe.
    Ack(ProbeAck),
    /// Answer to a request triple.
    Reply(Reply),
}

/// Serialise a frame to a single compact JSON line (without the newline).
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if serialisation fails.
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<String> {
    serde_json::to_string(frame)
        .map_err(|err| AppError::Protocol(format!("failed to serialise frame: {err}")))
}

/// Parse an inbound line on the worker side.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if the line is neither `"ping"` nor a
/// request triple.
pub fn decode_request(line: &str) -> Result<RequestFrame> {
    serde_json::from_str(line).map_err(|err| {
        AppError::Protocol(format!("expected \"ping\" or a request triple: {err}"))
    })
}

/// Parse an inbound line on the supervisor side.
///
/// # Errors
///
/// Returns [`AppError::Protocol`] if the line is neither `"pong"` nor a reply.
pub fn decode_reply(line: &str) -> Result<ReplyFrame> {
    serde_json::from_str(line)
        .map_err(|err| AppError::Protocol(format!("expected \"pong\" or a reply: {err}")))
}
