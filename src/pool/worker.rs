use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use crate::{
    Result,
    common::Queue,
    pool::message::{ResultMessage, TaskMessage, WorkerCommand},
};

/// Runs tasks inside one worker.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Executes `task` on worker `worker`. Failures are reported in the result.
    async fn execute(
        &self,
        worker: usize,
        task: TaskMessage,
    ) -> ResultMessage;

    /// Releases the worker's collaborators before it exits.
    async fn cleanup(&self) {}
}

/// Builds one executor per worker, so workers never share collaborators.
pub trait ExecutorFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn TaskExecutor>>;
}

/// Applies a finished task's result to whoever submitted it.
pub trait ResultSink: Send + Sync {
    fn apply(
        &self,
        result: &ResultMessage,
    ) -> Result<()>;
}

/// Starts workers bound to the pool's task and result channels.
pub trait WorkerLauncher: Send + Sync {
    fn launch(
        &self,
        index: usize,
        tasks: Arc<Queue<WorkerCommand>>,
        results: Arc<Queue<ResultMessage>>,
    ) -> Result<()>;
}

/// Hosts workers as tasks on a tokio runtime.
///
/// A panicking task is reported as a failed result, the worker itself keeps serving.
pub struct InProcessLauncher {
    factory: Arc<dyn ExecutorFactory>,
    handle: Handle,
}

impl InProcessLauncher {
    pub fn new(
        factory: Arc<dyn ExecutorFactory>,
        handle: Handle,
    ) -> Self {
        Self {
            factory,
            handle,
        }
    }
}

impl WorkerLauncher for InProcessLauncher {
    fn launch(
        &self,
        index: usize,
        tasks: Arc<Queue<WorkerCommand>>,
        results: Arc<Queue<ResultMessage>>,
    ) -> Result<()> {
        let executor = self.factory.create()?;
        let handle = self.handle.clone();
        self.handle.spawn(async move {
            info!("worker {} started", index);
            while let Some(command) = tasks.next_async().await {
                let task = match command {
                    WorkerCommand::Shutdown => break,
                    WorkerCommand::Run(task) => task,
                };
                debug!("worker {} took task {} in slot {}", index, task.task_id, task.slot);
                let runner = executor.clone();
                let submitted = task.clone();
                let result = match handle.spawn(async move { runner.execute(index, submitted).await }).await {
                    Ok(result) => result,
                    Err(err) => ResultMessage::failed(&task, format!("Worker {} crashed: {}", index, err)),
                };
                if let Err(err) = results.send(result) {
                    error!("worker {} could not report task {}: {}", index, task.task_id, err);
                    break;
                }
            }
            executor.cleanup().await;
            info!("worker {} stopped", index);
        });
        Ok(())
    }
}
