use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Result, ScrapeflowError};

/// One declarative pipeline node.
///
/// The node kind is carried in the parenthesized suffix of `name`,
/// e.g. `"Fetch listing (request.page)"`. Every other key is a
/// kind-specific parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionConfig {
    pub name: String,

    /// Swallow `abort` escalations raised by this node's children.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub boundary: bool,

    /// Expression guarding this node; the parent skips it when false.
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    #[serde(rename = "CHILDREN", default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ActionConfig>,

    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl ActionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_param(
        mut self,
        key: &str,
        value: impl Into<Value>,
    ) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_children(
        mut self,
        children: Vec<ActionConfig>,
    ) -> Self {
        self.children = children;
        self
    }

    pub fn with_boundary(mut self) -> Self {
        self.boundary = true;
        self
    }

    /// Extracts the kind id from the parenthesized suffix of the name.
    pub fn kind(&self) -> Result<&str> {
        let name = self.name.trim_end();
        let kind = name
            .strip_suffix(')')
            .and_then(|rest| rest.rfind('(').map(|start| rest[start + 1..].trim()))
            .filter(|kind| !kind.is_empty());

        kind.ok_or_else(|| ScrapeflowError::Pipeline(format!("node '{}' does not name a kind, expected '<label> (<kind>)'", self.name)))
    }

    /// Human label without the kind suffix.
    pub fn label(&self) -> &str {
        match self.name.rfind('(') {
            Some(start) => self.name[..start].trim(),
            None => self.name.trim(),
        }
    }

    pub fn param(
        &self,
        key: &str,
    ) -> Option<&Value> {
        self.params.get(key)
    }

    /// Parameters as a json object, the input of an action's constructor.
    pub fn params_value(&self) -> Value {
        Value::Object(self.params.clone())
    }
}
