use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    Result,
    pipeline::{
        Scope,
        actions::{Action, ActionResult, ActionType, from_params},
        expr::ExprSource,
    },
    runtime::Item,
};

#[derive(Debug, Clone, Deserialize)]
struct EvalParams {
    expression: String,
    target_field: String,
}

/// Stores the value of a sandboxed expression under `target_field`.
#[derive(Debug, Clone)]
pub struct EvalAction {
    expression: ExprSource,
    target_field: String,
}

#[async_trait]
impl Action for EvalAction {
    fn create(params: Value) -> Result<Self> {
        let params: EvalParams = from_params(params, &Self::schema())?;
        Ok(Self {
            expression: ExprSource::new(&params.expression)?,
            target_field: params.target_field,
        })
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["expression", "target_field"],
            "properties": {
                "expression": { "type": "string" },
                "target_field": { "type": "string" }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::Eval
    }

    async fn execute(
        &self,
        _scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let value = self.expression.eval(item)?;
        item.set(self.target_field.as_str(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{model::ActionConfig, pipeline::actions::testing};

    fn eval(expression: &str) -> ActionConfig {
        ActionConfig::new("Compute (eval)").with_param("expression", expression).with_param("target_field", "out")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_eval_sets_target() {
        let services = testing::factory().create().unwrap();
        let outcome = testing::run(services, vec![eval("page * size + 1")], json!({"page": 2, "size": 10})).await;
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.item.get("out"), Some(&json!(21)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_eval_failure_is_error() {
        let services = testing::factory().create().unwrap();
        let outcome = testing::run(services, vec![eval("missing + 1")], json!({})).await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.ctx.tally().failed, 1);
    }
}
