use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::{
    Result,
    error::{ActionError, Severity},
    pipeline::{
        Pipeline, Registry, RunScope,
        consts::{PROCESS_ID_KEY, SLOT_ID_KEY},
    },
    pool::{ExecutorFactory, ResultMessage, TaskExecutor, TaskMessage},
    runtime::{Channel, ExecutionContext, Item, RunInfo, Services, ServicesFactory},
};

/// Gives every worker its own services and a shared action registry.
pub struct PipelineExecutorFactory {
    services: ServicesFactory,
    registry: Arc<Registry>,
}

impl PipelineExecutorFactory {
    pub fn new(
        services: ServicesFactory,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            services,
            registry,
        }
    }
}

impl ExecutorFactory for PipelineExecutorFactory {
    fn create(&self) -> Result<Arc<dyn TaskExecutor>> {
        Ok(Arc::new(PipelineExecutor {
            services: self.services.create()?,
            registry: self.registry.clone(),
        }))
    }
}

/// Runs a shipped sub-tree against a fresh context and reports its tally.
pub struct PipelineExecutor {
    services: Services,
    registry: Arc<Registry>,
}

#[async_trait]
impl TaskExecutor for PipelineExecutor {
    async fn execute(
        &self,
        worker: usize,
        task: TaskMessage,
    ) -> ResultMessage {
        let info = RunInfo {
            run_id: task.run_id.clone(),
            scraper_id: task.scraper_id.clone(),
            scraper_name: task.scraper_name.clone(),
            ..Default::default()
        };
        let ctx = Arc::new(ExecutionContext::new(info, Arc::new(Channel::detached())));

        let mut item = Item::from_map(task.item);
        item.set(SLOT_ID_KEY, task.slot);
        item.set(PROCESS_ID_KEY, worker);

        match Pipeline::from_actions(task.actions, task.properties, &self.registry).await {
            Ok(pipeline) => {
                let scope = RunScope::new(ctx.clone(), self.services.clone(), pipeline.properties());
                match scope.run(&pipeline, &mut item).await {
                    Ok(()) | Err(ActionError::ProcessAbort) => {}
                    Err(ActionError::Raised {
                        severity: Severity::Fatal,
                        message,
                    }) => ctx.record_error(&message),
                    Err(err) => debug!("task {} ended early: {}", task.task_id, err),
                }
            }
            Err(err) => {
                error!("worker {} could not build task {}: {}", worker, task.task_id, err);
                ctx.record_error(&format!("Error starting process: {}", err));
            }
        }

        let tally = ctx.tally();
        let message = [&tally.info, &tally.warnings, &tally.errors].into_iter().find(|lines| !lines.is_empty()).map(|lines| lines.join("\n")).unwrap_or_default();
        ResultMessage {
            task_id: task.task_id,
            slot: task.slot,
            run_id: task.run_id,
            tally,
            message,
        }
    }

    async fn cleanup(&self) {
        self.services.cleanup().await;
    }
}
