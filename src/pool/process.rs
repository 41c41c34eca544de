//! Workers hosted in child processes, speaking json lines over stdio.
//!
//! The pool writes one [`WorkerCommand`] per line to the child's stdin and
//! reads one [`ResultMessage`] per line from its stdout. Worker logs go to
//! stderr, which the child inherits.

use std::{process::Stdio, sync::Arc};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    runtime::Handle,
};
use tracing::{error, info, warn};

use crate::{
    Result, ScrapeflowError,
    common::Queue,
    pool::{
        ExecutorFactory, WorkerLauncher,
        message::{ResultMessage, TaskMessage, WorkerCommand},
    },
};

/// Environment variable carrying a worker's index into the child process.
pub const WORKER_INDEX_ENV: &str = "SCRAPEFLOW_WORKER_INDEX";

struct ChildWorker {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl ChildWorker {
    fn spawn(
        program: &str,
        args: &[String],
        index: usize,
    ) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .env(WORKER_INDEX_ENV, index.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScrapeflowError::Pool(format!("failed to spawn worker {} ({}): {}", index, program, e)))?;
        let stdin = child.stdin.take().ok_or_else(|| ScrapeflowError::Pool("worker stdin is not piped".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| ScrapeflowError::Pool("worker stdout is not piped".into()))?;
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn send(
        &mut self,
        command: &WorkerCommand,
    ) -> Result<()> {
        let mut line = serde_json::to_string(command)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn run(
        &mut self,
        task: &TaskMessage,
    ) -> Result<ResultMessage> {
        self.send(&WorkerCommand::Run(task.clone())).await?;
        match self.stdout.next_line().await? {
            Some(line) => Ok(serde_json::from_str::<ResultMessage>(&line)?),
            None => {
                let status = self.child.wait().await?;
                Err(ScrapeflowError::Pool(format!("worker exited with {}", status)))
            }
        }
    }

    async fn shutdown(mut self) {
        if self.send(&WorkerCommand::Shutdown).await.is_ok() {
            drop(self.stdin);
            if let Err(err) = self.child.wait().await {
                warn!("worker did not exit cleanly: {}", err);
            }
        } else {
            let _ = self.child.kill().await;
        }
    }
}

/// Spawns one child process per worker.
///
/// A child that dies mid-task yields a failed result for that task and is
/// replaced before the next one.
pub struct ProcessLauncher {
    program: String,
    args: Vec<String>,
    handle: Handle,
}

impl ProcessLauncher {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        handle: Handle,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            handle,
        }
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(
        &self,
        index: usize,
        tasks: Arc<Queue<WorkerCommand>>,
        results: Arc<Queue<ResultMessage>>,
    ) -> Result<()> {
        let worker = {
            let _guard = self.handle.enter();
            ChildWorker::spawn(&self.program, &self.args, index)?
        };
        let program = self.program.clone();
        let args = self.args.clone();
        self.handle.spawn(async move {
            info!("worker process {} started", index);
            let mut worker = Some(worker);
            while let Some(command) = tasks.next_async().await {
                let task = match command {
                    WorkerCommand::Shutdown => break,
                    WorkerCommand::Run(task) => task,
                };
                if worker.is_none() {
                    worker = ChildWorker::spawn(&program, &args, index).map_err(|err| error!("{}", err)).ok();
                }
                let result = match worker.as_mut() {
                    Some(child) => match child.run(&task).await {
                        Ok(result) => result,
                        Err(err) => {
                            error!("worker process {} lost task {}: {}", index, task.task_id, err);
                            worker = None;
                            ResultMessage::failed(&task, format!("Worker {} crashed: {}", index, err))
                        }
                    },
                    None => ResultMessage::failed(&task, format!("Worker {} is not available", index)),
                };
                if let Err(err) = results.send(result) {
                    error!("worker process {} could not report task {}: {}", index, task.task_id, err);
                    break;
                }
            }
            if let Some(worker) = worker {
                worker.shutdown().await;
            }
            info!("worker process {} stopped", index);
        });
        Ok(())
    }
}

/// Serves the worker side of the protocol on stdin/stdout until told to
/// shut down or stdin closes.
pub async fn serve_stdio(
    factory: Arc<dyn ExecutorFactory>,
    index: usize,
) -> Result<()> {
    let executor = factory.create()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WorkerCommand>(&line)? {
            WorkerCommand::Shutdown => break,
            WorkerCommand::Run(task) => {
                let result = executor.execute(index, task).await;
                let mut reply = serde_json::to_string(&result)?;
                reply.push('\n');
                stdout.write_all(reply.as_bytes()).await?;
                stdout.flush().await?;
            }
        }
    }
    executor.cleanup().await;
    Ok(())
}
