//! Unit tests for request/reply frame decoding.

use appvisor::wire::protocol::{
    decode_reply, decode_request, Failure, FailureKind, Probe, ProbeAck, Reply, ReplyFrame,
    Request, RequestFrame,
};
use appvisor::AppError;
use serde_json::json;

#[test]
fn ping_decodes_as_probe() {
    assert_eq!(
        decode_request("\"ping\"").unwrap(),
        RequestFrame::Probe(Probe::Ping)
    );
}

#[test]
fn triple_decodes_as_message() {
    let frame = decode_request(r#"["flowchart","setInput",{"dataIn":[1,2]}]"#).unwrap();
    let RequestFrame::Message(request) = frame else {
        panic!("expected a message frame");
    };
    assert_eq!(request.target_name(), "flowchart");
    assert_eq!(request.target_property(), "setInput");
    assert_eq!(request.value(), &json!({"dataIn": [1, 2]}));
    assert!(request.targets_coordinator());
}

#[test]
fn other_strings_are_rejected() {
    let err = decode_request("\"pong\"").expect_err("pong is not a request");
    assert!(matches!(err, AppError::Protocol(_)));
}

#[test]
fn short_arrays_are_rejected() {
    assert!(decode_request(r#"["scale","factor"]"#).is_err());
    assert!(decode_request(r#"["scale","factor",1,2]"#).is_err());
}

#[test]
fn pong_decodes_as_ack() {
    assert_eq!(
        decode_reply("\"pong\"").unwrap(),
        ReplyFrame::Ack(ProbeAck::Pong)
    );
}

#[test]
fn err_reply_decodes_with_trace() {
    let line = r#"{"err":{"kind":"invalid_value","message":"bad","trace":["root cause"]}}"#;
    let ReplyFrame::Reply(reply) = decode_reply(line).unwrap() else {
        panic!("expected a reply frame");
    };
    let failure = reply.failure_ref().expect("failure");
    assert_eq!(failure.kind, FailureKind::InvalidValue);
    assert_eq!(failure.trace, vec!["root cause".to_owned()]);
}

#[test]
fn missing_trace_defaults_to_empty() {
    let line = r#"{"err":{"kind":"app","message":"boom"}}"#;
    let ReplyFrame::Reply(Reply::Err(failure)) = decode_reply(line).unwrap() else {
        panic!("expected an error reply");
    };
    assert!(failure.trace.is_empty());
}

#[test]
fn null_ok_value_is_preserved() {
    assert_eq!(
        decode_reply(r#"{"ok":null}"#).unwrap(),
        ReplyFrame::Reply(Reply::Ok(serde_json::Value::Null))
    );
}

#[test]
fn failure_from_error_walks_source_chain() {
    #[derive(Debug)]
    struct Outer(std::io::Error);
    impl std::fmt::Display for Outer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("outer failed")
        }
    }
    impl std::error::Error for Outer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            Some(&self.0)
        }
    }

    let err = Outer(std::io::Error::other("disk on fire"));
    let failure = Failure::from_error(FailureKind::App, &err);
    assert_eq!(failure.message, "outer failed");
    assert_eq!(failure.trace, vec!["disk on fire".to_owned()]);
}

#[test]
fn request_parts_round_out() {
    let (name, property, value) = Request::new("scale", "enabled", json!(false)).into_parts();
    assert_eq!((name.as_str(), property.as_str(), value), ("scale", "enabled", json!(false)));
}
