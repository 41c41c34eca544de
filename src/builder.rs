use std::sync::Arc;

use tokio::runtime::Handle;

use crate::{
    Result, RunQueue, ScrapeflowError,
    collab::{LogMailer, Mailer},
    config::{Config, WorkerMode},
    pipeline::Registry,
    pool::{InProcessLauncher, ProcessLauncher, WorkerLauncher, WorkerPool},
    queue::{PipelineExecutorFactory, RunRegistry},
    runtime::ServicesFactory,
};

/// Assembles a [`RunQueue`] from a [`Config`] and optional overrides.
pub struct QueueBuilder {
    config: Config,
    services: Option<ServicesFactory>,
    registry: Option<Registry>,
    mailer: Option<Arc<dyn Mailer>>,
    launcher: Option<Arc<dyn WorkerLauncher>>,
    handle: Option<Handle>,
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl QueueBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            services: None,
            registry: None,
            mailer: None,
            launcher: None,
            handle: None,
        }
    }

    /// Replaces the services built from the config, for the host and every worker.
    pub fn services(
        mut self,
        services: ServicesFactory,
    ) -> Self {
        self.services = Some(services);
        self
    }

    /// Replaces the built-in action registry.
    pub fn registry(
        mut self,
        registry: Registry,
    ) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn mailer(
        mut self,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        self.mailer = Some(mailer);
        self
    }

    /// Overrides how workers are started. Defaults to the configured [`WorkerMode`].
    pub fn launcher(
        mut self,
        launcher: Arc<dyn WorkerLauncher>,
    ) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Runtime the queue spawns on. Defaults to the current one.
    pub fn runtime(
        mut self,
        handle: Handle,
    ) -> Self {
        self.handle = Some(handle);
        self
    }

    pub fn build(self) -> Result<RunQueue> {
        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| ScrapeflowError::Engine(format!("no tokio runtime available: {}", e)))?,
        };
        let factory = match self.services {
            Some(factory) => factory,
            None => ServicesFactory::from_config(&self.config)?,
        };
        let registry = Arc::new(self.registry.unwrap_or_default());

        let launcher: Arc<dyn WorkerLauncher> = match (self.launcher, self.config.pool.mode) {
            (Some(launcher), _) => launcher,
            (None, WorkerMode::InProcess) => Arc::new(InProcessLauncher::new(Arc::new(PipelineExecutorFactory::new(factory.clone(), registry.clone())), handle.clone())),
            (None, WorkerMode::Process) => {
                let program = match &self.config.pool.worker_program {
                    Some(program) => program.clone(),
                    None => std::env::current_exe()?.to_string_lossy().into_owned(),
                };
                Arc::new(ProcessLauncher::new(program, self.config.pool.worker_args.clone(), handle.clone()))
            }
        };

        let runs = Arc::new(RunRegistry::new());
        let pool = Arc::new(WorkerPool::new(self.config.pool.workers, launcher, runs.clone()));
        let services = factory.create()?;
        services.store.health_check()?;

        Ok(RunQueue::new(self.config, services, registry, runs, pool, self.mailer.unwrap_or_else(|| Arc::new(LogMailer)), handle))
    }
}
