//! Worker side: everything that runs inside a launched app process.
//!
//! - `coordinator`: traits for the app's stateful object graph.
//! - `dispatcher`: applies request triples to that graph, total over inputs.
//! - `listener`: owns the bound socket and relays requests to the primary context.
//! - `host`: the primary context loop and the display handle.

pub mod coordinator;
pub mod dispatcher;
pub mod host;
pub mod listener;
