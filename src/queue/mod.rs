//! Run queue: starts scraper runs, routes worker results to them and
//! finishes them.
//!
//! ```rust,ignore
//! let queue = QueueBuilder::new(config).build()?;
//! queue.launch()?;
//!
//! let run_id = queue.start_scraper("jobs", Properties::new())?;
//! queue.stop_scraper(&run_id)?;
//! ```

mod executor;
mod inflight;
pub mod report;
mod runner;
mod scheduler;

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::{Datelike, Timelike};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::{
    Result, ScrapeflowError,
    collab::Mailer,
    common::{MemCache, Shutdown},
    config::Config,
    events::RunSummary,
    model::{Properties, ScraperModel},
    pipeline::Registry,
    pool::WorkerPool,
    runtime::{Channel, Services},
    store::Store,
    utils,
};

pub use executor::{PipelineExecutor, PipelineExecutorFactory};
pub use inflight::{ExecutionItem, RunRegistry};
pub use scheduler::{FireFn, ScheduledJob, Scheduler, Trigger};

/// Finished run summaries kept for report and log lookups.
const SUMMARY_CACHE_SIZE: usize = 512;

/// A request to run one scraper.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub scraper: ScraperModel,
    /// weekday the run is attributed to, Monday = 0
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    /// overrides merged over the pipeline properties; also the initial item
    pub properties: Properties,
}

impl RunRequest {
    /// A request attributed to the current local time.
    pub fn now(
        scraper: ScraperModel,
        properties: Properties,
    ) -> Self {
        let now = utils::time::now_local();
        Self {
            scraper,
            day: now.weekday().num_days_from_monday(),
            hour: now.hour(),
            minute: now.minute(),
            properties,
        }
    }
}

pub(crate) struct QueueInner {
    pub(crate) config: Config,
    pub(crate) services: Services,
    pub(crate) registry: Arc<Registry>,
    pub(crate) runs: Arc<RunRegistry>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) channel: Arc<Channel>,
    pub(crate) mailer: Arc<dyn Mailer>,
    pub(crate) summaries: MemCache<String, RunSummary>,
    scheduler: Scheduler,
    handle: Handle,
    running: AtomicBool,
    shutdown: Arc<Shutdown>,
}

/// Entry point of the engine. Cheap to clone.
#[derive(Clone)]
pub struct RunQueue {
    inner: Arc<QueueInner>,
}

impl RunQueue {
    /// Assembles a queue. The pool's results must be routed to `runs`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Config,
        services: Services,
        registry: Arc<Registry>,
        runs: Arc<RunRegistry>,
        pool: Arc<WorkerPool>,
        mailer: Arc<dyn Mailer>,
        handle: Handle,
    ) -> Self {
        let grace = Duration::from_secs(config.scheduler.misfire_grace_secs);
        Self {
            inner: Arc::new(QueueInner {
                config,
                services,
                registry,
                runs,
                pool,
                channel: Arc::new(Channel::new(handle.clone())),
                mailer,
                summaries: MemCache::new(SUMMARY_CACHE_SIZE),
                scheduler: Scheduler::new(handle.clone(), grace),
                handle,
                running: AtomicBool::new(false),
                shutdown: Arc::new(Shutdown::new()),
            }),
        }
    }

    /// Starts dispatching events and, when enabled, registers the schedules
    /// of every active scraper.
    pub fn launch(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.channel.listen();
        if self.inner.config.scheduler.enabled {
            let count = self.load_schedules()?;
            info!("registered {} schedules", count);
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Replaces every trigger with the schedules of the active scrapers.
    pub fn load_schedules(&self) -> Result<usize> {
        let inner = &self.inner;
        inner.scheduler.clear();
        for scraper in inner.services.store.active_scrapers()? {
            for entry in &scraper.schedules {
                let trigger = match Trigger::new(&scraper.id, &scraper.name, entry.clone()) {
                    Ok(trigger) => trigger,
                    Err(err) => {
                        warn!("skipping schedule of '{}': {}", scraper.name, err);
                        continue;
                    }
                };
                let queue = Arc::downgrade(&self.inner);
                inner.scheduler.add(trigger, Arc::new(move |trigger: &Trigger| fire(&queue, trigger)))?;
            }
        }
        Ok(inner.scheduler.len())
    }

    pub fn scheduled_jobs(&self) -> Vec<ScheduledJob> {
        self.inner.scheduler.jobs()
    }

    /// Starts a stored scraper in the background and returns the run id.
    pub fn start_scraper(
        &self,
        scraper_id: &str,
        properties: Properties,
    ) -> Result<String> {
        let scraper = self.inner.services.store.scraper(scraper_id)?;
        self.start(RunRequest::now(scraper, properties))
    }

    /// Starts `request` in the background and returns the run id.
    pub fn start(
        &self,
        request: RunRequest,
    ) -> Result<String> {
        self.ensure_running()?;
        let item = runner::start_task(&self.inner, request)?;
        let run_id = item.ctx.run_id().to_string();
        let inner = self.inner.clone();
        self.inner.handle.spawn(async move {
            runner::execute_task(&inner, item).await;
        });
        Ok(run_id)
    }

    /// Runs `request` to completion.
    pub async fn run(
        &self,
        request: RunRequest,
    ) -> Result<RunSummary> {
        self.ensure_running()?;
        let item = runner::start_task(&self.inner, request)?;
        Ok(runner::execute_task(&self.inner, item).await)
    }

    /// Asks a running scraper to stop at its next check.
    pub fn stop_scraper(
        &self,
        run_id: &str,
    ) -> Result<()> {
        match self.inner.runs.get(run_id) {
            Some(item) => {
                item.ctx.stop();
                info!("stop requested for run {}", run_id);
                Ok(())
            }
            None => Err(ScrapeflowError::Queue(format!("Run {} is not running", run_id))),
        }
    }

    /// Ids of the runs currently in flight.
    pub fn running_runs(&self) -> Vec<String> {
        self.inner.runs.items().iter().map(|item| item.ctx.run_id().to_string()).collect()
    }

    /// Summary of a finished run still held in the cache.
    pub fn summary(
        &self,
        run_id: &str,
    ) -> Option<RunSummary> {
        self.inner.summaries.get(&run_id.to_string())
    }

    pub fn report(
        &self,
        run_id: &str,
    ) -> Option<Value> {
        match self.inner.runs.get(run_id) {
            Some(item) => Some(Value::Object(item.ctx.tally().reports)),
            None => self.summary(run_id).map(|summary| summary.report),
        }
    }

    pub fn log(
        &self,
        run_id: &str,
    ) -> Option<String> {
        match self.inner.runs.get(run_id) {
            Some(item) => Some(item.ctx.log_text()),
            None => self.summary(run_id).map(|summary| summary.log),
        }
    }

    pub fn channel(&self) -> Arc<Channel> {
        self.inner.channel.clone()
    }

    pub fn store(&self) -> Arc<Store> {
        self.inner.services.store.clone()
    }

    pub fn pool(&self) -> Arc<WorkerPool> {
        self.inner.pool.clone()
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.inner.registry.clone()
    }

    /// Resolves once [`RunQueue::shutdown`] has been called.
    pub fn wait_shutdown(&self) -> impl Future<Output = ()> + Send + 'static {
        self.inner.shutdown.wait()
    }

    /// Cancels triggers, stops in-flight runs and workers, then releases
    /// the host services.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let inner = &self.inner;
        inner.scheduler.clear();
        for item in inner.runs.items() {
            item.ctx.stop();
        }
        inner.pool.stop().await?;
        inner.services.cleanup().await;
        inner.services.store.close();
        inner.channel.shutdown();
        inner.shutdown.shutdown();
        info!("queue stopped");
        Ok(())
    }

    fn ensure_running(&self) -> Result<()> {
        if !self.is_running() {
            return Err(ScrapeflowError::Queue("Queue is not running".into()));
        }
        Ok(())
    }
}

/// Starts the scraper of a fired trigger with a fresh copy of its definition.
fn fire(
    queue: &Weak<QueueInner>,
    trigger: &Trigger,
) {
    let Some(inner) = queue.upgrade() else {
        return;
    };
    let queue = RunQueue {
        inner,
    };
    let scraper = match queue.inner.services.store.scraper(&trigger.scraper_id) {
        Ok(scraper) if scraper.active => scraper,
        Ok(_) => {
            info!("'{}' is no longer active, skipping", trigger.scraper_name);
            return;
        }
        Err(err) => {
            error!("failed to load scheduled scraper '{}': {}", trigger.scraper_name, err);
            return;
        }
    };
    let now = utils::time::now_local();
    let request = RunRequest {
        scraper,
        day: now.weekday().num_days_from_monday(),
        hour: trigger.entry.hour,
        minute: trigger.entry.minute,
        properties: trigger.entry.properties.clone(),
    };
    if let Err(err) = queue.start(request) {
        error!("failed to start scheduled run of '{}': {}", trigger.scraper_name, err);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        QueueBuilder,
        model::{RunStatus, ScheduleEntry},
        pipeline::actions::testing,
        store::query::Query,
    };

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scheduled_fire_passes_entry_properties() {
        let config = Config::load_from_str("[pool]\nworkers = 1\nmode = \"in_process\"\n\n[scheduler]\nenabled = false\n").unwrap();
        let queue = QueueBuilder::new(config).services(testing::factory()).build().unwrap();
        queue.launch().unwrap();

        let entry = serde_json::from_value::<ScheduleEntry>(json!({"day": "MO", "hour": 1, "properties": {"page": 3}})).unwrap();
        assert_eq!(entry.properties.get("page"), Some(&json!(3)));
        let scraper = ScraperModel {
            id: "pager".into(),
            name: "pager".into(),
            active: true,
            source: json!({"actions": [{"name": "Page (log)", "text": "page ${page}"}]}).to_string(),
            schedules: vec![entry.clone()],
            ..Default::default()
        };
        queue.store().save_scraper(&scraper).unwrap();

        let trigger = Trigger::new(&scraper.id, &scraper.name, entry).unwrap();
        fire(&Arc::downgrade(&queue.inner), &trigger);

        let mut summary = None;
        for _ in 0..100 {
            let runs = queue.store().runs().unwrap().query(&Query::new()).unwrap();
            summary = runs.rows.first().and_then(|run| queue.summary(&run.id));
            if summary.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let summary = summary.unwrap();
        assert_eq!(summary.status, RunStatus::Success);
        assert!(summary.log.contains("page 3"), "{}", summary.log);
        assert_eq!(queue.store().runs().unwrap().find(&summary.run_id).unwrap().hour, 1);
        queue.shutdown().await.unwrap();
    }
}
