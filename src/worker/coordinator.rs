//! Traits for the stateful objects a worker exposes to the supervisor.
//!
//! A worker hosts one [`Coordinator`] (addressed as `""`, `fc`, or
//! `flowchart`) that owns any number of named [`Node`]s. Both are only ever
//! touched from the worker's primary context, so neither needs to be `Sync`.

use std::fmt::{Display, Formatter};

use serde_json::{Map, Value};

use crate::wire::protocol::{Failure, FailureKind};

/// Failure raised by coordinator or node code while handling a command.
#[derive(Debug)]
pub enum CommandError {
    /// The node has no settable property with this name.
    UnknownProperty {
        /// Node that was addressed.
        node: String,
        /// Property that was requested.
        property: String,
    },
    /// The value does not fit the target.
    InvalidValue {
        /// Property or input slot that rejected the value.
        target: String,
        /// What was wrong with it.
        reason: String,
        /// Underlying decode failure, when there was one.
        source: Option<serde_json::Error>,
    },
    /// Any other app-level failure.
    Failed(String),
}

impl CommandError {
    /// Convenience constructor for [`CommandError::InvalidValue`] without a source.
    #[must_use]
    pub fn invalid(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            target: target.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// Wire category for this failure.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnknownProperty { .. } => FailureKind::UnknownProperty,
            Self::InvalidValue { .. } => FailureKind::InvalidValue,
            Self::Failed(_) => FailureKind::App,
        }
    }

    /// Convert into a wire failure, keeping the cause chain.
    #[must_use]
    pub fn into_failure(self) -> Failure {
        Failure::from_error(self.kind(), &self)
    }
}

impl Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownProperty { node, property } => {
                write!(f, "node '{node}' has no property '{property}'")
            }
            Self::InvalidValue { target, reason, .. } => {
                write!(f, "invalid value for '{target}': {reason}")
            }
            Self::Failed(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidValue {
                source: Some(err), ..
            } => Some(err),
            _ => None,
        }
    }
}

/// A named sub-component with settable properties.
pub trait Node: Send {
    /// Name the node is registered under.
    fn name(&self) -> &str;

    /// Set `property` to `value`.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::UnknownProperty`] for names the node does not
    /// expose and [`CommandError::InvalidValue`] for values of the wrong type.
    fn set_property(&mut self, property: &str, value: Value) -> Result<(), CommandError>;
}

/// The worker's top-level stateful object.
pub trait Coordinator: Send {
    /// Apply named inputs and return whatever the input operation produces.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] when an input slot is unknown or its data
    /// cannot be processed.
    fn set_input(&mut self, inputs: Map<String, Value>) -> Result<Value, CommandError>;

    /// Current output values.
    fn output_values(&self) -> Value;

    /// Look up a registered node by name.
    fn node_mut(&mut self, name: &str) -> Option<&mut dyn Node>;

    /// Names of all registered nodes, in registration order.
    fn node_names(&self) -> Vec<String>;

    /// Called after a node property was set successfully.
    fn node_changed(&mut self, _name: &str) {}
}
