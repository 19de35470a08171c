#![forbid(unsafe_code)]

//! `appvisor`: application-process supervisor.
//!
//! Launches app workers as separate OS processes, assigns each a loopback
//! port, talks to them over a newline-delimited JSON request/reply
//! protocol, and watches them for exit.

pub mod apps;
pub mod config;
pub mod errors;
pub mod manager;
pub mod transport;
pub mod wire;
pub mod worker;

pub use config::SupervisorConfig;
pub use errors::{AppError, Result};
pub use manager::supervisor::{AppEvent, Supervisor};
pub use manager::table::AppId;
