//! Minimal flowchart coordinator used by the built-in apps.
//!
//! A [`Flowchart`] feeds its `dataIn` input through a chain of nodes and
//! exposes the result as `dataOut`. Disabled nodes are bypassed. Any node
//! property change re-runs the chain on the last input.

use serde_json::{json, Map, Value};

use crate::worker::coordinator::{CommandError, Coordinator, Node};

/// Name of the single input slot.
pub const DATA_IN: &str = "dataIn";

/// Name of the single output slot.
pub const DATA_OUT: &str = "dataOut";

/// A node that can take part in a flowchart chain.
pub trait FlowNode: Node {
    /// Whether the node participates in processing.
    fn enabled(&self) -> bool;

    /// Transform the data flowing through the node.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError`] if the data cannot be processed.
    fn process(&self, data: Value) -> Result<Value, CommandError>;

    /// View as a plain [`Node`] for property access.
    fn as_node_mut(&mut self) -> &mut dyn Node;
}

/// Chain of nodes with one input slot and one output slot.
#[derive(Default)]
pub struct Flowchart {
    nodes: Vec<Box<dyn FlowNode>>,
    input: Option<Value>,
    output: Map<String, Value>,
}

impl Flowchart {
    /// Empty flowchart: output mirrors input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node to the end of the chain.
    #[must_use]
    pub fn with_node(mut self, node: Box<dyn FlowNode>) -> Self {
        self.nodes.push(node);
        self
    }

    fn evaluate(&mut self) -> Result<(), CommandError> {
        let Some(input) = self.input.clone() else {
            return Ok(());
        };
        let mut data = input;
        for node in self.nodes.iter().filter(|node| node.enabled()) {
            data = node.process(data)?;
        }
        self.output.insert(DATA_OUT.to_owned(), data);
        Ok(())
    }
}

impl Coordinator for Flowchart {
    fn set_input(&mut self, mut inputs: Map<String, Value>) -> Result<Value, CommandError> {
        if let Some(unknown) = inputs.keys().find(|key| key.as_str() != DATA_IN) {
            return Err(CommandError::invalid(
                unknown.clone(),
                format!("unknown input slot; expected '{DATA_IN}'"),
            ));
        }
        let Some(data) = inputs.remove(DATA_IN) else {
            return Err(CommandError::invalid(DATA_IN, "missing input data"));
        };
        self.input = Some(data);
        self.evaluate()?;
        Ok(Value::Null)
    }

    fn output_values(&self) -> Value {
        Value::Object(self.output.clone())
    }

    fn node_mut(&mut self, name: &str) -> Option<&mut dyn Node> {
        self.nodes
            .iter_mut()
            .find(|node| node.name() == name)
            .map(|node| node.as_node_mut())
    }

    fn node_names(&self) -> Vec<String> {
        self.nodes.iter().map(|node| node.name().to_owned()).collect()
    }

    fn node_changed(&mut self, name: &str) {
        if let Err(err) = self.evaluate() {
            tracing::warn!(node = name, %err, "re-evaluation after property change failed");
        }
    }
}

/// Forwards data unchanged.
#[derive(Debug)]
pub struct PassNode {
    name: String,
    enabled: bool,
}

impl PassNode {
    /// A new, enabled pass-through node.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
        }
    }
}

impl Node for PassNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_property(&mut self, property: &str, value: Value) -> Result<(), CommandError> {
        match property {
            "enabled" => {
                self.enabled = expect_bool(property, &value)?;
                Ok(())
            }
            _ => Err(CommandError::UnknownProperty {
                node: self.name.clone(),
                property: property.to_owned(),
            }),
        }
    }
}

impl FlowNode for PassNode {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn process(&self, data: Value) -> Result<Value, CommandError> {
        Ok(data)
    }

    fn as_node_mut(&mut self) -> &mut dyn Node {
        self
    }
}

/// Multiplies every number in the data (recursively) by `factor`.
#[derive(Debug)]
pub struct ScaleNode {
    name: String,
    enabled: bool,
    factor: f64,
}

impl ScaleNode {
    /// A new, enabled scaling node.
    #[must_use]
    pub fn new(name: impl Into<String>, factor: f64) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            factor,
        }
    }

    /// Current scale factor.
    #[must_use]
    pub fn factor(&self) -> f64 {
        self.factor
    }
}

impl Node for ScaleNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_property(&mut self, property: &str, value: Value) -> Result<(), CommandError> {
        match property {
            "enabled" => {
                self.enabled = expect_bool(property, &value)?;
                Ok(())
            }
            "factor" => {
                let factor: f64 =
                    serde_json::from_value(value).map_err(|err| CommandError::InvalidValue {
                        target: property.to_owned(),
                        reason: "expected a number".into(),
                        source: Some(err),
                    })?;
                if !factor.is_finite() {
                    return Err(CommandError::invalid(property, "factor must be finite"));
                }
                self.factor = factor;
                Ok(())
            }
            _ => Err(CommandError::UnknownProperty {
                node: self.name.clone(),
                property: property.to_owned(),
            }),
        }
    }
}

impl FlowNode for ScaleNode {
    fn enabled(&self) -> bool {
        self.enabled
    }

    fn process(&self, data: Value) -> Result<Value, CommandError> {
        Ok(scale(data, self.factor))
    }

    fn as_node_mut(&mut self) -> &mut dyn Node {
        self
    }
}

fn scale(data: Value, factor: f64) -> Value {
    match data {
        Value::Number(n) => n
            .as_f64()
            .map_or(Value::Number(n), |x| json!(x * factor)),
        Value::Array(items) => Value::Array(items.into_iter().map(|v| scale(v, factor)).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, v)| (key, scale(v, factor)))
                .collect(),
        ),
        other => other,
    }
}

fn expect_bool(property: &str, value: &Value) -> Result<bool, CommandError> {
    value
        .as_bool()
        .ok_or_else(|| CommandError::invalid(property, format!("expected a boolean, got {value}")))
}
