//! Command dispatcher: applies a request triple to the worker's object graph.
//!
//! Dispatch is total. Every request yields a [`Reply`]; unknown targets,
//! rejected values, and even panics inside coordinator code come back as
//! [`Reply::Err`] so the listener loop never sees a fault.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde_json::Value;
use tracing::{debug, warn};

use crate::wire::protocol::{FailureKind, Reply, Request, GET_OUTPUT, SET_INPUT};
use crate::worker::coordinator::Coordinator;

/// Routes requests to a coordinator and its nodes.
pub struct Dispatcher {
    coordinator: Box<dyn Coordinator>,
}

impl Dispatcher {
    /// Wrap a coordinator.
    #[must_use]
    pub fn new(coordinator: Box<dyn Coordinator>) -> Self {
        Self { coordinator }
    }

    /// Apply `request` and produce its reply.
    pub fn dispatch(&mut self, request: Request) -> Reply {
        debug!(
            target_name = request.target_name(),
            target_property = request.target_property(),
            "dispatching request"
        );

        let coordinator = &mut self.coordinator;
        match catch_unwind(AssertUnwindSafe(|| route(coordinator.as_mut(), request))) {
            Ok(reply) => reply,
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_owned())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_owned());
                warn!(%message, "request handler panicked");
                Reply::failure(FailureKind::Panic, message)
            }
        }
    }
}

fn route(coordinator: &mut dyn Coordinator, request: Request) -> Reply {
    if request.targets_coordinator() {
        let (_, property, value) = request.into_parts();
        return route_coordinator(coordinator, &property, value);
    }

    let (name, property, value) = request.into_parts();
    let Some(node) = coordinator.node_mut(&name) else {
        let known = coordinator.node_names().join(", ");
        return Reply::failure(
            FailureKind::UnknownNode,
            format!("no node named '{name}' (known nodes: [{known}])"),
        );
    };

    match node.set_property(&property, value) {
        Ok(()) => {
            coordinator.node_changed(&name);
            Reply::success()
        }
        Err(err) => Reply::Err(err.into_failure()),
    }
}

fn route_coordinator(coordinator: &mut dyn Coordinator, property: &str, value: Value) -> Reply {
    match property {
        SET_INPUT => {
            let Value::Object(inputs) = value else {
                return Reply::failure(
                    FailureKind::InvalidValue,
                    format!("'{SET_INPUT}' expects an object mapping input names to data"),
                );
            };
            match coordinator.set_input(inputs) {
                Ok(produced) => Reply::Ok(produced),
                Err(err) => Reply::Err(err.into_failure()),
            }
        }
        GET_OUTPUT => Reply::Ok(coordinator.output_values()),
        other => Reply::failure(
            FailureKind::UnsupportedProperty,
            format!(
                "flowchart supports only setting input values ('{SET_INPUT}') \
                 or getting output values ('{GET_OUTPUT}'); '{other}' is not known"
            ),
        ),
    }
}
