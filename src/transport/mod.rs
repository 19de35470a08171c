//! Loopback TCP transport shared by the supervisor and the worker runner.
//!
//! A [`context::TransportContext`] is created once per process and passed
//! to every endpoint and listener built in that process. Terminating the
//! context stops listeners and fails any round trip still waiting for a
//! reply.

pub mod context;
pub mod endpoint;
