//! Unit tests for the built-in app registry and argument parsing.

use appvisor::apps::{parse_args, AppRegistry};
use appvisor::wire::protocol::{Reply, Request};
use appvisor::worker::dispatcher::Dispatcher;
use appvisor::worker::host::HostedApp;
use appvisor::AppError;
use serde_json::{json, Value};

#[test]
fn builtin_registry_lists_flowchart_apps() {
    let names = AppRegistry::builtin().names();
    assert_eq!(names, vec!["flowchart/passthrough", "flowchart/scaled"]);
}

#[test]
fn unknown_pair_is_app_error() {
    let Err(err) = AppRegistry::builtin().resolve("flowchart", "missing") else {
        panic!("pair should not be registered");
    };
    assert!(matches!(err, AppError::App(ref msg) if msg.contains("'missing'")));
}

fn mirror(args: &[Value]) -> appvisor::Result<HostedApp> {
    AppRegistry::builtin().resolve("flowchart", "passthrough")?(args)
}

#[test]
fn register_adds_a_custom_app() {
    let mut registry = AppRegistry::new();
    registry.register("custom", "mirror", mirror);
    assert!(registry.resolve("custom", "mirror").is_ok());
    assert!(registry.resolve("flowchart", "passthrough").is_err());
}

#[test]
fn parse_args_keeps_json_and_strings() {
    let raw = vec![
        "2.5".to_owned(),
        "{\"a\":1}".to_owned(),
        "plain text".to_owned(),
        "true".to_owned(),
    ];
    assert_eq!(
        parse_args(&raw),
        vec![json!(2.5), json!({"a": 1}), json!("plain text"), json!(true)]
    );
}

#[test]
fn passthrough_mirrors_input() {
    let setup = AppRegistry::builtin()
        .resolve("flowchart", "passthrough")
        .expect("builtin");
    let app = setup(&[]).expect("setup");
    let mut dispatcher = Dispatcher::new(app.coordinator);

    dispatcher.dispatch(Request::new("", "setInput", json!({"dataIn": {"x": [1, 2]}})));
    let out = dispatcher.dispatch(Request::new("", "getOutput", Value::Null));
    assert_eq!(out, Reply::Ok(json!({"dataOut": {"x": [1, 2]}})));
}

#[test]
fn scaled_takes_initial_factor_from_first_arg() {
    let setup = AppRegistry::builtin()
        .resolve("flowchart", "scaled")
        .expect("builtin");
    let app = setup(&[json!(4)]).expect("setup");
    let mut dispatcher = Dispatcher::new(app.coordinator);

    dispatcher.dispatch(Request::new("", "setInput", json!({"dataIn": [1, 2]})));
    let out = dispatcher.dispatch(Request::new("", "getOutput", Value::Null));
    assert_eq!(out, Reply::Ok(json!({"dataOut": [4.0, 8.0]})));
}

#[test]
fn scaled_rejects_non_numeric_factor() {
    let setup = AppRegistry::builtin()
        .resolve("flowchart", "scaled")
        .expect("builtin");
    assert!(matches!(setup(&[json!("huge")]), Err(AppError::App(_))));
}

#[test]
fn new_app_display_is_open() {
    let setup = AppRegistry::builtin()
        .resolve("flowchart", "passthrough")
        .expect("builtin");
    let app = setup(&[]).expect("setup");
    assert!(!app.display.is_closed());
    app.display.close();
    assert!(app.display.is_closed());
}
