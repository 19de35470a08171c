//! Unit tests for `WireCodec` framing.

use appvisor::wire::codec::{fits_in_frame, WireCodec, MAX_FRAME_BYTES};
use appvisor::AppError;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

#[test]
fn decodes_one_line_per_frame() {
    let mut codec = WireCodec::new();
    let mut buf = BytesMut::from("\"ping\"\n[\"\",\"getOutput\",null]\n");

    assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("\"ping\""));
    assert_eq!(
        codec.decode(&mut buf).unwrap().as_deref(),
        Some("[\"\",\"getOutput\",null]")
    );
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
}

#[test]
fn partial_line_waits_for_newline() {
    let mut codec = WireCodec::new();
    let mut buf = BytesMut::from("\"po");
    assert_eq!(codec.decode(&mut buf).unwrap(), None);

    buf.extend_from_slice(b"ng\"\n");
    assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("\"pong\""));
}

#[test]
fn encode_appends_newline() {
    let mut codec = WireCodec::new();
    let mut buf = BytesMut::new();
    codec.encode("{\"ok\":true}".to_owned(), &mut buf).unwrap();
    assert_eq!(&buf[..], b"{\"ok\":true}\n");
}

#[test]
fn oversized_frame_is_a_transport_error() {
    let mut codec = WireCodec::new();
    let mut buf = BytesMut::from(vec![b'x'; MAX_FRAME_BYTES + 1].as_slice());

    let err = codec.decode(&mut buf).expect_err("line exceeds the limit");
    assert!(matches!(err, AppError::Transport(ref msg) if msg.contains("frame too long")));
}

#[test]
fn frame_limit_applies_to_the_line_without_newline() {
    assert!(fits_in_frame(&"x".repeat(MAX_FRAME_BYTES)));
    assert!(!fits_in_frame(&"x".repeat(MAX_FRAME_BYTES + 1)));
}
