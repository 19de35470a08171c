//! Wire protocol for the supervisor ↔ worker RPC channel.
//!
//! - `codec`: newline-delimited framing with a maximum frame length.
//! - `protocol`: probe, request triple, and tagged reply shapes.

pub mod codec;
pub mod protocol;
