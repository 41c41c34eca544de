use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;

use crate::{
    Result,
    error::{ActionError, Severity},
    pipeline::{
        Scope, as_i64,
        actions::{Action, ActionResult, ActionType, estimated_records, from_params},
        expr::ExprSource,
        template,
    },
    runtime::Item,
};

/// Resolves a count given either as a number or as a template.
fn count_of(
    value: &Value,
    name: &str,
    item: &Item,
) -> std::result::Result<i64, ActionError> {
    let resolved = match value {
        Value::String(text) => template::render_value(text, item)?,
        other => other.clone(),
    };
    as_i64(&resolved).ok_or_else(|| ActionError::error(format!("'{}' must resolve to a number, got {}", name, resolved)))
}

fn ensure_running(scope: &Scope<'_>) -> ActionResult {
    if scope.ctx().is_running() { Ok(()) } else { Err(ActionError::ProcessAbort) }
}

/// Synthetic root holding a pipeline's top-level actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WrapperAction {}

#[async_trait]
impl Action for WrapperAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({ "type": "object" })
    }

    fn action_type(&self) -> ActionType {
        ActionType::Wrapper
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        scope.execute_children(item).await
    }
}

#[derive(Debug, Clone, Deserialize)]
struct IfParams {
    condition: String,
}

/// Runs its children only when `condition` holds for the current item.
#[derive(Debug, Clone)]
pub struct IfAction {
    condition: ExprSource,
}

#[async_trait]
impl Action for IfAction {
    fn create(params: Value) -> Result<Self> {
        let params: IfParams = from_params(params, &Self::schema())?;
        Ok(Self {
            condition: ExprSource::new(&params.condition)?,
        })
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["condition"],
            "properties": {
                "condition": { "type": "string", "description": "boolean expression, may embed ${path} templates" }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::If
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        if self.condition.is_true(item)? {
            scope.execute_children(item).await?;
        }
        Ok(())
    }
}

/// Runs its children once per element of a list held by the item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForEachAction {
    source_field: String,
    target_field: String,
    #[serde(default)]
    index_field: Option<String>,
    /// page count; the step total becomes `pages × len`
    #[serde(default)]
    record_count: Option<Value>,
}

#[async_trait]
impl Action for ForEachAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["source_field", "target_field"],
            "properties": {
                "source_field": { "type": "string" },
                "target_field": { "type": "string" },
                "index_field": { "type": "string" },
                "record_count": { "type": ["string", "integer"] }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::ForEach
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let values = match template::resolve(item, &self.source_field)? {
            Value::Array(values) => values,
            Value::Null => Vec::new(),
            other => return Err(ActionError::error(format!("'{}' is not a list: {}", self.source_field, other))),
        };

        if let Some(record_count) = &self.record_count {
            let pages = count_of(record_count, "record_count", item)?;
            scope.ctx().set_total_records(estimated_records(pages, values.len()));
        }

        for (index, value) in values.into_iter().enumerate() {
            ensure_running(scope)?;
            let mut branch = item.branch();
            if let Some(index_field) = &self.index_field {
                branch.set(index_field.as_str(), index);
            }
            branch.set(self.target_field.as_str(), value);
            scope.execute_children(&mut branch).await?;
        }
        Ok(())
    }
}

/// Runs its children `count` times with an increasing index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatAction {
    count: Value,
    #[serde(default)]
    start_index: i64,
    index_field: String,
}

#[async_trait]
impl Action for RepeatAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["count", "index_field"],
            "properties": {
                "count": { "type": ["string", "integer"] },
                "start_index": { "type": "integer" },
                "index_field": { "type": "string" }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::Repeat
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let count = count_of(&self.count, "count", item)?;
        let end = self.start_index.checked_add(count.max(0)).ok_or_else(|| ActionError::error(format!("Repeat range {} + {} overflows", self.start_index, count)))?;
        for index in self.start_index..end {
            ensure_running(scope)?;
            let mut branch = item.branch();
            branch.set(self.index_field.as_str(), index);
            scope.execute_children(&mut branch).await?;
        }
        Ok(())
    }
}

/// Runs its children and swallows whatever escapes them, except fatal
/// failures and stop requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBoundaryAction {
    /// label written to the log when a failure is swallowed
    #[serde(default)]
    log: Option<String>,
}

#[async_trait]
impl Action for ErrorBoundaryAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "log": { "type": "string" }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::ErrorBoundary
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        match scope.execute_children(item).await {
            Err(ActionError::ProcessAbort) => Err(ActionError::ProcessAbort),
            Err(err) if err.severity() == Some(Severity::Fatal) => Err(err),
            Err(err) => {
                warn!("{} swallowed: {}", self.log.as_deref().unwrap_or(scope.node().config().label()), err);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}
