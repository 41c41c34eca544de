use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    Result,
    collab::display,
    pipeline::{
        Scope,
        actions::{Action, ActionResult, ActionType, from_params},
        template,
    },
    runtime::Item,
};

/// Writes a line to the run log: rendered `text` followed by the value at `field`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogAction {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    field: Option<String>,
}

#[async_trait]
impl Action for LogAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" },
                "field": { "type": "string" }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::Log
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let mut line = match &self.text {
            Some(text) => template::render(text, item)?,
            None => String::new(),
        };
        if let Some(field) = &self.field {
            line.push_str(&display(&template::resolve(item, field)?));
        }
        scope.ctx().log(&line);
        Ok(())
    }
}

/// Logs a progress message and optionally advances the record counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogProgressAction {
    message: String,
    #[serde(default)]
    increase_current: u64,
}

#[async_trait]
impl Action for LogProgressAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["message"],
            "properties": {
                "message": { "type": "string" },
                "increase_current": { "type": "integer", "minimum": 0 }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::LogProgress
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let message = template::render(&self.message, item)?;
        scope.ctx().log_progress(&message, self.increase_current);
        Ok(())
    }
}

/// Starts a named step of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogStepAction {
    step_name: String,
    step_number: u32,
    #[serde(default)]
    step_count: Option<u32>,
}

#[async_trait]
impl Action for LogStepAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["step_name", "step_number"],
            "properties": {
                "step_name": { "type": "string" },
                "step_number": { "type": "integer", "minimum": 1 },
                "step_count": { "type": "integer", "minimum": 1 }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::LogStep
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        _item: &mut Item,
    ) -> ActionResult {
        let ctx = scope.ctx();
        if let Some(count) = self.step_count {
            ctx.set_steps(count);
        }
        ctx.start_step(&self.step_name, Some(self.step_number));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{model::ActionConfig, pipeline::actions::testing};

    #[tokio::test(flavor = "multi_thread")]
    async fn test_log_nodes() {
        let actions = vec![
            ActionConfig::new("Step (log_step)").with_param("step_name", "listing").with_param("step_number", 2).with_param("step_count", 3),
            ActionConfig::new("Say (log)").with_param("text", "job ${job.id}: ").with_param("field", "job.title"),
            ActionConfig::new("Tick (log_progress)").with_param("message", "done ${job.id}").with_param("increase_current", 1),
        ];
        let services = testing::factory().create().unwrap();
        let outcome = testing::run(services, actions, json!({"job": {"id": 7, "title": "Engineer"}})).await;
        assert!(outcome.result.is_ok());

        let log = outcome.ctx.log_text();
        assert!(log.contains("listing"));
        assert!(log.contains("job 7: Engineer"));
        assert!(log.contains("done 7"));

        let progress = outcome.ctx.progress("now");
        assert_eq!(progress.current, 1);
        let step = progress.step.unwrap();
        assert_eq!((step.name.as_str(), step.index, step.count), ("listing", 2, 3));
    }

    #[test]
    fn test_log_step_requires_number() {
        use crate::pipeline::actions::{Action, LogStepAction};
        assert!(LogStepAction::create(json!({"step_name": "x"})).is_err());
    }
}
