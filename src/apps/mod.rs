//! App registry: resolves `(module, function)` pairs to setup functions.
//!
//! The runner receives a module and a function name on its command line and
//! looks them up here. A setup function receives the forwarded extra
//! arguments as one slice and returns the app's coordinator paired with
//! its display.
//!
//! | Module      | Function      | App                                         |
//! |-------------|---------------|---------------------------------------------|
//! | `flowchart` | `passthrough` | single `pass` node; `dataOut` mirrors input |
//! | `flowchart` | `scaled`      | `scale` node; first arg = initial factor    |

pub mod flowchart;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::worker::host::HostedApp;
use crate::{AppError, Result};

use flowchart::{Flowchart, PassNode, ScaleNode};

/// Signature every app setup function must have.
pub type SetupFn = fn(&[Value]) -> Result<HostedApp>;

/// Lookup table of launchable apps.
#[derive(Clone, Default)]
pub struct AppRegistry {
    apps: BTreeMap<(String, String), SetupFn>,
}

impl std::fmt::Debug for AppRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppRegistry")
            .field("apps", &self.names())
            .finish()
    }
}

impl AppRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in apps.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("flowchart", "passthrough", passthrough);
        registry.register("flowchart", "scaled", scaled);
        registry
    }

    /// Register (or replace) a setup function.
    pub fn register(&mut self, module: &str, function: &str, setup: SetupFn) {
        self.apps
            .insert((module.to_owned(), function.to_owned()), setup);
    }

    /// Resolve a setup function.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::App`] if no app is registered under the pair.
    pub fn resolve(&self, module: &str, function: &str) -> Result<SetupFn> {
        self.apps
            .get(&(module.to_owned(), function.to_owned()))
            .copied()
            .ok_or_else(|| AppError::App(format!("no app '{function}' in module '{module}'")))
    }

    /// All registered `module/function` names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.apps
            .keys()
            .map(|(module, function)| format!("{module}/{function}"))
            .collect()
    }
}

/// Turn raw command-line arguments into setup arguments: valid JSON is
/// parsed, anything else is kept as a string.
#[must_use]
pub fn parse_args(raw: &[String]) -> Vec<Value> {
    raw.iter()
        .map(|arg| serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.clone())))
        .collect()
}

fn passthrough(_args: &[Value]) -> Result<HostedApp> {
    let fc = Flowchart::new().with_node(Box::new(PassNode::new("pass")));
    Ok(HostedApp::new(Box::new(fc)))
}

fn scaled(args: &[Value]) -> Result<HostedApp> {
    let factor = match args.first() {
        None => 1.0,
        Some(value) => value
            .as_f64()
            .ok_or_else(|| AppError::App(format!("scale factor must be a number, got {value}")))?,
    };
    let fc = Flowchart::new().with_node(Box::new(ScaleNode::new("scale", factor)));
    Ok(HostedApp::new(Box::new(fc)))
}
