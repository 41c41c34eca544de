use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Result, ScrapeflowError, model::ActionConfig};

/// Run-scoped shared configuration.
pub type Properties = Map<String, Value>;

/// Kind id of the synthetic root wrapping a pipeline's top-level actions.
pub const WRAPPER_KIND: &str = "pipeline.wrapper";

/// A complete declarative pipeline: ordered top-level actions plus
/// shared properties visible to every node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineModel {
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
    #[serde(default)]
    pub properties: Properties,
}

impl PipelineModel {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str::<PipelineModel>(s).map_err(|e| ScrapeflowError::Pipeline(format!("{}", e)))
    }

    pub fn from_yaml(s: &str) -> Result<Self> {
        serde_yaml::from_str::<PipelineModel>(s).map_err(|e| ScrapeflowError::Pipeline(format!("{}", e)))
    }

    /// Parses json when the source looks like an object, yaml otherwise.
    pub fn from_source(s: &str) -> Result<Self> {
        if s.trim_start().starts_with('{') {
            Self::from_json(s)
        } else {
            Self::from_yaml(s)
        }
    }

    /// Root node holding the top-level actions as children.
    pub fn root(&self) -> ActionConfig {
        ActionConfig::new(format!("Pipeline ({})", WRAPPER_KIND)).with_children(self.actions.clone())
    }

    /// Merges run properties over the pipeline's own.
    pub fn with_properties(
        mut self,
        properties: &Properties,
    ) -> Self {
        for (key, value) in properties {
            self.properties.insert(key.clone(), value.clone());
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const YAML: &str = r#"
properties:
  processed:
    target: result
actions:
  - name: Fetch (request.json)
    url: https://example.com/jobs
    target_field: jobs
    CHILDREN:
      - name: Each (controls.for_each)
        source_field: jobs
        target_field: job
"#;

    #[test]
    fn test_from_yaml() {
        let model = PipelineModel::from_source(YAML).unwrap();
        assert_eq!(model.actions.len(), 1);
        assert_eq!(model.actions[0].children.len(), 1);
        assert_eq!(model.properties["processed"], json!({"target": "result"}));
    }

    #[test]
    fn test_from_json_and_root() {
        let model = PipelineModel::from_source(r#"{"actions": [{"name": "Log (log)", "text": "hi"}]}"#).unwrap();
        let root = model.root();
        assert_eq!(root.kind().unwrap(), WRAPPER_KIND);
        assert_eq!(root.children.len(), 1);
    }

    #[test]
    fn test_with_properties_overrides() {
        let mut props = Properties::new();
        props.insert("page".into(), json!(3));
        let model = PipelineModel::from_json(r#"{"properties": {"page": 1, "keep": true}}"#).unwrap().with_properties(&props);
        assert_eq!(model.properties["page"], json!(3));
        assert_eq!(model.properties["keep"], json!(true));
    }

    #[test]
    fn test_invalid_source() {
        assert!(PipelineModel::from_json("{").is_err());
    }
}
