//! Newline-delimited JSON framing for the supervisor ↔ worker channel.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum frame length so a
//! misbehaving peer cannot make the other side buffer an unbounded line.
//! Each `\n`-terminated UTF-8 line carries exactly one JSON document, so the
//! transport preserves message boundaries and no partial-message handling is
//! needed above this layer.
//!
//! # Usage
//!
//! ```rust,ignore
//! use tokio_util::codec::Framed;
//! use appvisor::wire::codec::WireCodec;
//!
//! let framed = Framed::new(tcp_stream, WireCodec::new());
//! ```

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum frame length accepted by the decoder: 8 MiB.
///
/// Data payloads for `setInput` can be sizeable arrays, so the limit is
/// larger than a typical control channel would need.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Line codec for one RPC connection.
///
/// Inbound lines longer than [`MAX_FRAME_BYTES`] return
/// [`AppError::Transport`]`("frame too long: …")` rather than allocating.
/// I/O errors are mapped to [`AppError::Io`]. Outbound strings are encoded
/// as `item\n`; senders check [`fits_in_frame`] first so the peer never
/// receives a line it would refuse.
#[derive(Debug)]
pub struct WireCodec(LinesCodec);

impl WireCodec {
    /// Create a new `WireCodec` with the default [`MAX_FRAME_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_FRAME_BYTES))
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for WireCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for WireCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

/// Whether `line` (without its newline) is short enough for the peer's decoder.
#[must_use]
pub fn fits_in_frame(line: &str) -> bool {
    line.len() <= MAX_FRAME_BYTES
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Transport(format!("frame too long: exceeded {MAX_FRAME_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
