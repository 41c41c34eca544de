use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    Result,
    collab::{ElementExtract, FieldSpec, display},
    error::ActionError,
    pipeline::{
        Scope, as_i64,
        actions::{Action, ActionResult, ActionType, estimated_records, from_params},
        template,
    },
    runtime::Item,
};

fn document(item: &Item) -> std::result::Result<Arc<str>, ActionError> {
    item.shared_document().ok_or_else(|| ActionError::error("No document loaded"))
}

fn field_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "selector": { "type": "string" },
            "target_field": { "type": "string" },
            "attribute": { "type": "string" },
            "type": { "type": "string", "enum": ["text", "normalised_text", "html"] },
            "join": { "type": "array" },
            "string_join": { "type": "string" },
            "validate": { "type": "object" }
        }
    })
}

/// Extracts named fields from the current html document into the item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractDocFieldsAction {
    fields: Vec<FieldSpec>,
}

#[async_trait]
impl Action for ExtractDocFieldsAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["fields"],
            "properties": {
                "fields": {
                    "type": "array",
                    "items": {
                        "allOf": [field_schema(), { "required": ["selector", "target_field"] }]
                    }
                }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::ExtractDocFields
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let source = document(item)?;
        let values = scope.services().extractor.extract_fields(&source, &self.fields, item)?;
        for (target, value) in values {
            item.set(target, value);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnNone {
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnValue {
    Break,
}

/// Runs its children once per element matching `selector`, with the value
/// extracted from that element stored under `target_field`.
///
/// Without `fields` the node's own extractor keys are applied to the element
/// itself; with `fields` each element becomes a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractDocGroupsAction {
    selector: String,
    target_field: String,
    #[serde(default)]
    fields: Vec<FieldSpec>,
    #[serde(default)]
    count_field: Option<String>,
    #[serde(default)]
    record_count: Option<Value>,
    #[serde(default)]
    on_none: Option<OnNone>,
    #[serde(default)]
    on_value: Option<OnValue>,
    #[serde(flatten)]
    element: FieldSpec,
}

#[async_trait]
impl Action for ExtractDocGroupsAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["selector", "target_field"],
            "properties": {
                "selector": { "type": "string" },
                "target_field": { "type": "string" },
                "fields": { "type": "array", "items": field_schema() },
                "count_field": { "type": "string" },
                "record_count": { "type": ["string", "integer"] },
                "on_none": { "type": "string", "enum": ["skip"] },
                "on_value": { "type": "string", "enum": ["break"] }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::ExtractDocGroups
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let source = document(item)?;
        let extract = if self.fields.is_empty() {
            ElementExtract::Single(&self.element)
        } else {
            ElementExtract::Record(&self.fields)
        };
        let values = scope.services().extractor.extract_groups(&source, &self.selector, extract, item)?;

        if let Some(count_field) = &self.count_field {
            item.set(count_field.as_str(), values.len());
        }
        if let Some(record_count) = &self.record_count {
            let pages = match record_count {
                Value::String(text) => template::render_value(text, item)?,
                other => other.clone(),
            };
            let pages = as_i64(&pages).ok_or_else(|| ActionError::error(format!("'record_count' must resolve to a number, got {}", pages)))?;
            scope.ctx().set_total_records(estimated_records(pages, values.len()));
        }

        let mut found = false;
        for value in values {
            if !scope.ctx().is_running() {
                return Err(ActionError::ProcessAbort);
            }
            if value.is_none() && self.on_none == Some(OnNone::Skip) {
                continue;
            }
            let has_value = value.is_some();
            let mut branch = item.branch();
            branch.set(self.target_field.as_str(), value.unwrap_or(Value::Null));
            scope.execute_children(&mut branch).await?;
            found = true;

            if has_value && self.on_value == Some(OnValue::Break) {
                break;
            }
        }

        if !found {
            return Err(ActionError::error(format!("No items found for selector {}", self.selector)));
        }
        Ok(())
    }
}

fn default_separator() -> String {
    "\n".to_string()
}

/// Extracts fields from a json value held by the item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractJsonFieldsAction {
    /// item path of the extraction root, the whole item when absent
    #[serde(default)]
    root: Option<String>,
    #[serde(default = "default_separator")]
    separator: String,
    fields: Vec<FieldSpec>,
}

impl ExtractJsonFieldsAction {
    fn select(
        root: &Value,
        spec: &FieldSpec,
        selector: &str,
        item: &Item,
    ) -> std::result::Result<Option<Value>, ActionError> {
        match template::find_path(root, selector) {
            Ok(value) => spec.pipeline.apply(Some(value), item),
            Err(_) if spec.pipeline.optional.is_some() => spec.pipeline.missing(None, item),
            Err(err) => Err(err),
        }
    }

    fn combine(
        &self,
        root: &Value,
        fields: &[FieldSpec],
        item: &Item,
    ) -> std::result::Result<String, ActionError> {
        let mut parts = Vec::new();
        for spec in fields {
            if spec.target_field.is_some() {
                return Err(ActionError::fatal("When combining fields we do not expect a target field"));
            }
            if let Some(selector) = &spec.selector {
                match Self::select(root, spec, selector, item)? {
                    None => continue,
                    Some(value) if spec.join.is_empty() => parts.push(display(&value)),
                    Some(_) => {}
                }
            }
            if !spec.join.is_empty() {
                parts.push(self.combine(root, &spec.join, item)?);
            }
            if let Some(value) = &spec.value {
                parts.push(display(value));
            }
        }
        Ok(parts.join(&self.separator))
    }

    fn extract(
        &self,
        root: &Value,
        spec: &FieldSpec,
        item: &Item,
    ) -> std::result::Result<Value, ActionError> {
        let value = if let Some(selector) = &spec.selector {
            Self::select(root, spec, selector, item)?
        } else if !spec.join.is_empty() {
            let combined = self.combine(root, &spec.join, item)?;
            spec.pipeline.apply(Some(Value::String(combined)), item)?
        } else if let Some(value) = &spec.value {
            Some(value.clone())
        } else {
            return Err(ActionError::fatal("Invalid field configuration"));
        };
        Ok(value.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl Action for ExtractJsonFieldsAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["fields"],
            "properties": {
                "root": { "type": "string" },
                "separator": { "type": "string" },
                "fields": {
                    "type": "array",
                    "items": {
                        "allOf": [field_schema(), { "required": ["target_field"] }]
                    }
                }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::ExtractJsonFields
    }

    async fn execute(
        &self,
        _scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let root = match &self.root {
            Some(path) => template::resolve(item, path)?,
            None => item.to_value(),
        };
        for spec in &self.fields {
            let value = self.extract(&root, spec, item)?;
            if let Some(target) = &spec.target_field {
                item.set(target.as_str(), value);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::{
        model::{ActionConfig, Properties},
        pipeline::{ActionNode, Registry, RunScope, actions::testing, factory},
        runtime::{Channel, ExecutionContext},
    };

    const LISTING: &str = r#"
        <html><body>
          <h1 class="title">Openings</h1>
          <ul>
            <li class="job"><a href="/j/1">One</a></li>
            <li class="job"><span>no link</span></li>
            <li class="job"><a href="/j/3">Three</a></li>
          </ul>
        </body></html>
    "#;

    static SEEN: Mutex<Vec<Value>> = Mutex::new(Vec::new());

    #[derive(Debug)]
    struct Collect {}

    #[async_trait]
    impl Action for Collect {
        fn create(_params: Value) -> Result<Self> {
            Ok(Self {})
        }

        fn schema() -> Value {
            json!({})
        }

        fn action_type(&self) -> ActionType {
            ActionType::Custom
        }

        async fn execute(
            &self,
            _scope: &Scope<'_>,
            item: &mut Item,
        ) -> ActionResult {
            SEEN.lock().unwrap().push(item.get("link").cloned().unwrap_or(Value::Null));
            Ok(())
        }
    }

    fn with_document(html: &str) -> Item {
        let mut item = Item::new();
        item.set_document(html);
        item
    }

    async fn run_groups(groups: ActionConfig) -> testing::Outcome {
        let mut registry = Registry::default();
        registry.register("test.collect", factory::<Collect>);
        let groups = groups.with_children(vec![ActionConfig::new("Collect (test.collect)")]);
        // the document has to be on the item before the run starts
        let load = ActionConfig::new("Load (test.load)");
        registry.register("test.load", factory::<Load>);
        testing::run_with(testing::factory().create().unwrap(), &registry, vec![load, groups], Properties::new(), json!({})).await
    }

    #[derive(Debug)]
    struct Load;

    #[async_trait]
    impl Action for Load {
        fn create(_params: Value) -> Result<Self> {
            Ok(Self)
        }

        fn schema() -> Value {
            json!({})
        }

        fn action_type(&self) -> ActionType {
            ActionType::Custom
        }

        async fn execute(
            &self,
            _scope: &Scope<'_>,
            item: &mut Item,
        ) -> ActionResult {
            item.set_document(LISTING);
            Ok(())
        }
    }

    fn groups() -> ActionConfig {
        ActionConfig::new("Jobs (extract.doc_groups)")
            .with_param("selector", "li.job")
            .with_param("target_field", "link")
            .with_param("count_field", "found")
    }

    // groups share the SEEN static, so the scenarios run in one test
    #[tokio::test(flavor = "multi_thread")]
    async fn test_doc_groups() {
        let outcome = run_groups(groups().with_param("fields", json!([{"selector": "a", "target_field": "href", "attribute": "href", "optional": true}]))).await;
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.item.get("found"), Some(&json!(3)));
        let seen = std::mem::take(&mut *SEEN.lock().unwrap());
        assert_eq!(seen, vec![json!({"href": "/j/1"}), json!({"href": null}), json!({"href": "/j/3"})]);

        // the element itself, skipping elements without a value
        let single = groups().with_param("regex", json!({"search": "(One|Three)"})).with_param("on_none", "skip");
        let outcome = run_groups(single).await;
        assert!(outcome.result.is_ok());
        let seen = std::mem::take(&mut *SEEN.lock().unwrap());
        assert_eq!(seen, vec![json!("One"), json!("Three")]);

        // stop at the first value
        let first = groups().with_param("regex", json!({"search": "(One|Three)"})).with_param("on_none", "skip").with_param("on_value", "break");
        run_groups(first).await.result.unwrap();
        let seen = std::mem::take(&mut *SEEN.lock().unwrap());
        assert_eq!(seen, vec![json!("One")]);

        // nothing matched at all
        let none = ActionConfig::new("Jobs (extract.doc_groups)").with_param("selector", "table").with_param("target_field", "link");
        let outcome = run_groups(none).await;
        assert!(outcome.result.is_err());
        assert!(outcome.ctx.tally().errors[0].starts_with("No items found for selector table"));
        assert!(SEEN.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_doc_fields() {
        let services = testing::factory().create().unwrap();
        let fields = ActionConfig::new("Fields (extract.doc_fields)").with_param(
            "fields",
            json!([
                {"selector": "h1.title", "target_field": "title"},
                {"selector": "li.job a", "target_field": "first", "attribute": "href"},
                {"selector": ".salary", "target_field": "salary", "optional": true}
            ]),
        );
        let run = RunScope::new(Arc::new(ExecutionContext::new(testing::run_info(), Arc::new(Channel::detached()))), services, Arc::new(Properties::new()));
        let node = ActionNode::build(&fields, &Registry::default()).unwrap();
        let mut item = with_document(LISTING);
        node.action().execute(&Scope::new(&run, &node), &mut item).await.unwrap();
        assert_eq!(item.get("title"), Some(&json!("Openings")));
        assert_eq!(item.get("first"), Some(&json!("/j/1")));
        assert_eq!(item.get("salary"), Some(&Value::Null));

        let missing = ActionConfig::new("Fields (extract.doc_fields)").with_param("fields", json!([{"selector": ".salary", "target_field": "salary"}]));
        let node = ActionNode::build(&missing, &Registry::default()).unwrap();
        let err = node.action().execute(&Scope::new(&run, &node), &mut item).await.unwrap_err();
        assert_eq!(err, ActionError::error("Could not find element at .salary"));

        let err = node.action().execute(&Scope::new(&run, &node), &mut Item::new()).await.unwrap_err();
        assert_eq!(err, ActionError::error("No document loaded"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_json_fields() {
        let action = ActionConfig::new("Fields (extract.json_fields)").with_param("root", "job").with_param("separator", ", ").with_param(
            "fields",
            json!([
                {"selector": "title", "target_field": "title"},
                {"selector": "salary.min", "target_field": "min", "convert": "int"},
                {"selector": "?remote", "target_field": "remote"},
                {"target_field": "location", "join": [
                    {"selector": "city"},
                    {"selector": "region", "optional": true},
                    {"value": "AU"}
                ]},
                {"target_field": "source", "value": "api"}
            ]),
        );
        let item = json!({"job": {"title": "Engineer", "salary": {"min": "1,200"}, "city": "Perth"}});
        let outcome = testing::run(testing::factory().create().unwrap(), vec![action], item).await;
        assert!(outcome.result.is_ok(), "{:?}", outcome.ctx.tally().errors);
        let item = outcome.item;
        assert_eq!(item.get("title"), Some(&json!("Engineer")));
        assert_eq!(item.get("min"), Some(&json!(1200)));
        assert_eq!(item.get("remote"), Some(&Value::Null));
        assert_eq!(item.get("location"), Some(&json!("Perth, AU")));
        assert_eq!(item.get("source"), Some(&json!("api")));
    }
}
