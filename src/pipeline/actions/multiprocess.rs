use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    Result,
    error::ActionError,
    pipeline::{
        Scope,
        actions::{Action, ActionResult, ActionType, default_true, from_params},
    },
    pool::TaskMessage,
    runtime::Item,
    utils,
};

/// Ships its children, with a snapshot of the current item, to the worker pool.
///
/// The children are validated when the pipeline loads but only built inside
/// the worker that runs them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartProcessAction {
    /// cap on workers busy at once for this submission
    #[serde(default)]
    max_processes: Option<usize>,
}

#[async_trait]
impl Action for StartProcessAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "max_processes": { "type": "integer", "minimum": 1 }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::StartProcess
    }

    fn builds_children(&self) -> bool {
        false
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let info = scope.ctx().info();
        if info.run_id.is_empty() {
            return Err(ActionError::error("A run id is required to start a process"));
        }
        let children = &scope.node().config().children;
        if children.is_empty() {
            return Err(ActionError::error("This action needs to have children"));
        }
        let pool = scope.pool().ok_or_else(|| ActionError::error("No worker pool is available to start a process"))?;

        let task = TaskMessage {
            task_id: utils::longid(),
            slot: 0,
            run_id: info.run_id.clone(),
            scraper_id: info.scraper_id.clone(),
            scraper_name: info.scraper_name.clone(),
            actions: children.clone(),
            properties: scope.properties().clone(),
            item: item.to_map(),
        };
        let slot = pool.schedule(task, self.max_processes).await?;
        debug!("run {} started a process in slot {}", info.run_id, slot);
        Ok(())
    }
}

/// Waits until every outstanding process task has reported back.
///
/// Results are folded into their runs as they arrive, so once this returns the
/// counters of the current run include every finished sub-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeProcessesAction {
    /// shut the workers down once they are idle
    #[serde(default = "default_true")]
    stop_workers: bool,
}

#[async_trait]
impl Action for MergeProcessesAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "stop_workers": { "type": "boolean" }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::MergeProcesses
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        _item: &mut Item,
    ) -> ActionResult {
        match scope.pool() {
            Some(pool) => Ok(pool.wait_for_slots_to_finish(self.stop_workers).await?),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::runtime::Handle;

    use super::*;
    use crate::{
        model::ActionConfig,
        pipeline::{Pipeline, Registry, RunScope, actions::testing},
        pool::{InProcessLauncher, ResultMessage, ResultSink, WorkerPool},
        queue::PipelineExecutorFactory,
        runtime::{Channel, ExecutionContext},
    };

    /// Folds every result into one context.
    struct Absorb(Arc<ExecutionContext>);

    impl ResultSink for Absorb {
        fn apply(
            &self,
            result: &ResultMessage,
        ) -> Result<()> {
            self.0.absorb(&result.tally)
        }
    }

    fn fan_out(max_processes: Option<usize>) -> Vec<ActionConfig> {
        let mut start = ActionConfig::new("Fan out (multiprocessing.start)").with_children(vec![
            ActionConfig::new("Store (save_record)").with_param("selector", "job"),
            ActionConfig::new("Odd (controls.if)")
                .with_param("condition", "job % 2 == 1")
                .with_children(vec![ActionConfig::new("Fail (eval)").with_param("expression", "nothing").with_param("target_field", "x")]),
        ]);
        if let Some(max) = max_processes {
            start = start.with_param("max_processes", max);
        }
        vec![
            ActionConfig::new("Jobs (controls.for_each)")
                .with_param("source_field", "jobs")
                .with_param("target_field", "job")
                .with_children(vec![start]),
            ActionConfig::new("Merge (multiprocessing.merge)"),
        ]
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fan_out_and_merge() {
        let factory = testing::factory();
        let ctx = Arc::new(ExecutionContext::new(testing::run_info(), Arc::new(Channel::detached())));
        let registry = Arc::new(Registry::default());
        let launcher = InProcessLauncher::new(Arc::new(PipelineExecutorFactory::new(factory.clone(), registry.clone())), Handle::current());
        let pool = Arc::new(WorkerPool::new(2, Arc::new(launcher), Arc::new(Absorb(ctx.clone()))));

        let pipeline = Pipeline::from_actions(fan_out(Some(2)), Default::default(), &registry).await.unwrap();
        let services = factory.create().unwrap();
        let store = services.store.clone();
        let scope = RunScope::new(ctx.clone(), services, pipeline.properties()).with_pool(pool.clone());
        let mut item = Item::from_value(json!({"jobs": [1, 2, 3, 4, 5]})).unwrap();
        let result = scope.run(&pipeline, &mut item).await;

        assert!(result.is_ok());
        let tally = ctx.tally();
        assert_eq!(tally.succeeded, 5);
        assert_eq!(tally.failed, 3);
        assert_eq!(tally.errors.len(), 3);
        assert_eq!(pool.busy_slots().await, 0);
        assert_eq!(pool.workers().await, 0);
        assert_eq!(store.records().unwrap().count(&Default::default()).unwrap(), 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_start_requires_pool_and_children() {
        let services = testing::factory().create().unwrap();
        let outcome = testing::run(services.clone(), fan_out(None), json!({"jobs": [1]})).await;
        assert!(outcome.result.is_err());
        assert!(outcome.ctx.tally().errors[0].starts_with("No worker pool is available"));

        let outcome = testing::run(services, vec![ActionConfig::new("Fan out (multiprocessing.start)")], json!({})).await;
        assert!(outcome.ctx.tally().errors[0].starts_with("This action needs to have children"));
    }
}
