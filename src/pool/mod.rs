//! Fixed-capacity worker pool with slot-based admission.
//!
//! [`WorkerPool::schedule`] never buffers more tasks than there are slots:
//! when every slot is busy the caller waits for a result, applies it and
//! reuses the slot it freed. Results are applied through a [`ResultSink`]
//! in the order they arrive.

pub mod merge;
mod message;
mod process;
mod worker;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{Result, ScrapeflowError, common::Queue};

pub use merge::merge_reports;
pub use message::{ResultMessage, TaskMessage, WorkerCommand};
pub use process::{ProcessLauncher, WORKER_INDEX_ENV, serve_stdio};
pub use worker::{ExecutorFactory, InProcessLauncher, ResultSink, TaskExecutor, WorkerLauncher};

#[derive(Debug)]
struct PoolState {
    /// task id held by each slot
    slots: Vec<Option<String>>,
    /// workers launched and not yet told to stop
    workers: usize,
}

impl PoolState {
    fn busy(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Frees the slot of `result` if it still holds that task.
    fn release(
        &mut self,
        result: &ResultMessage,
    ) -> bool {
        match self.slots.get_mut(result.slot) {
            Some(slot) if slot.as_deref() == Some(result.task_id.as_str()) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }
}

pub struct WorkerPool {
    capacity: usize,
    launcher: Arc<dyn WorkerLauncher>,
    sink: Arc<dyn ResultSink>,
    tasks: Arc<Queue<WorkerCommand>>,
    results: Arc<Queue<ResultMessage>>,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("capacity", &self.capacity).finish()
    }
}

impl WorkerPool {
    pub fn new(
        capacity: usize,
        launcher: Arc<dyn WorkerLauncher>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            launcher,
            sink,
            tasks: Queue::unbounded(),
            results: Queue::unbounded(),
            state: Mutex::new(PoolState {
                slots: vec![None; capacity],
                workers: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently holding a task.
    pub async fn busy_slots(&self) -> usize {
        self.state.lock().await.busy()
    }

    pub async fn workers(&self) -> usize {
        self.state.lock().await.workers
    }

    /// Submits `task`, waiting for a free slot first.
    ///
    /// Launches one more worker while fewer than the capacity (and
    /// `max_concurrent`, when given) are running. Returns the slot the task
    /// was placed in.
    pub async fn schedule(
        &self,
        mut task: TaskMessage,
        max_concurrent: Option<usize>,
    ) -> Result<usize> {
        let limit = max_concurrent.map(|n| n.clamp(1, self.capacity)).unwrap_or(self.capacity);
        let mut state = self.state.lock().await;

        if state.workers < limit {
            self.launcher.launch(state.workers, self.tasks.clone(), self.results.clone())?;
            state.workers += 1;
            debug!("pool launched worker {} of {}", state.workers, self.capacity);
        }

        let slot = loop {
            if state.busy() < limit {
                if let Some(slot) = state.free_slot() {
                    break slot;
                }
            }
            let result = self.next_result().await?;
            self.apply(&mut state, result);
        };

        state.slots[slot] = Some(task.task_id.clone());
        task.slot = slot;
        debug!("task {} of run {} placed in slot {}", task.task_id, task.run_id, slot);
        if let Err(err) = self.tasks.send(WorkerCommand::Run(task)) {
            state.slots[slot] = None;
            return Err(err);
        }
        Ok(slot)
    }

    /// Applies results until no slot is busy. With `stop`, every worker that
    /// reports is told to shut down, and the rest are stopped at the end.
    pub async fn wait_for_slots_to_finish(
        &self,
        stop: bool,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        while state.busy() > 0 {
            let result = self.next_result().await?;
            self.apply(&mut state, result);
            if stop && state.workers > 0 {
                state.workers -= 1;
                self.tasks.send(WorkerCommand::Shutdown)?;
            }
        }
        if stop {
            self.stop_workers(&mut state)?;
        }
        Ok(())
    }

    /// Sends one shutdown command per running worker. Busy workers finish
    /// their current task first.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.stop_workers(&mut state)
    }

    fn stop_workers(
        &self,
        state: &mut PoolState,
    ) -> Result<()> {
        if state.workers > 0 {
            info!("stopping {} workers", state.workers);
        }
        while state.workers > 0 {
            state.workers -= 1;
            self.tasks.send(WorkerCommand::Shutdown)?;
        }
        Ok(())
    }

    async fn next_result(&self) -> Result<ResultMessage> {
        self.results.next_async().await.ok_or_else(|| ScrapeflowError::Pool("result channel closed".into()))
    }

    fn apply(
        &self,
        state: &mut PoolState,
        result: ResultMessage,
    ) {
        if !state.release(&result) {
            warn!("ignoring result of task {} for slot {}: slot no longer holds it", result.task_id, result.slot);
            return;
        }
        if let Err(err) = self.sink.apply(&result) {
            error!("failed to apply result of task {} to run {}: {}", result.task_id, result.run_id, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Mutex as StdMutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::runtime::Handle;

    use super::*;
    use crate::utils;

    #[derive(Default)]
    struct Gauge {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    struct SleepyExecutor {
        gauge: Arc<Gauge>,
    }

    #[async_trait]
    impl TaskExecutor for SleepyExecutor {
        async fn execute(
            &self,
            _worker: usize,
            task: TaskMessage,
        ) -> ResultMessage {
            let now = self.gauge.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.gauge.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.gauge.running.fetch_sub(1, Ordering::SeqCst);
            ResultMessage {
                task_id: task.task_id,
                slot: task.slot,
                run_id: task.run_id,
                tally: crate::runtime::Tally {
                    succeeded: 1,
                    ..Default::default()
                },
                message: String::new(),
            }
        }
    }

    struct SleepyFactory {
        gauge: Arc<Gauge>,
    }

    impl ExecutorFactory for SleepyFactory {
        fn create(&self) -> Result<Arc<dyn TaskExecutor>> {
            Ok(Arc::new(SleepyExecutor {
                gauge: self.gauge.clone(),
            }))
        }
    }

    #[derive(Default)]
    struct Collect {
        results: StdMutex<Vec<ResultMessage>>,
    }

    impl ResultSink for Collect {
        fn apply(
            &self,
            result: &ResultMessage,
        ) -> Result<()> {
            self.results.lock().unwrap().push(result.clone());
            Ok(())
        }
    }

    fn pool(capacity: usize) -> (WorkerPool, Arc<Gauge>, Arc<Collect>) {
        let gauge = Arc::new(Gauge::default());
        let sink = Arc::new(Collect::default());
        let launcher = InProcessLauncher::new(
            Arc::new(SleepyFactory {
                gauge: gauge.clone(),
            }),
            Handle::current(),
        );
        (WorkerPool::new(capacity, Arc::new(launcher), sink.clone()), gauge, sink)
    }

    fn task() -> TaskMessage {
        TaskMessage {
            task_id: utils::shortid(),
            run_id: "r1".into(),
            ..Default::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_backpressure() {
        let (pool, gauge, sink) = pool(2);
        for n in 0..6 {
            let slot = pool.schedule(task(), None).await.unwrap();
            assert!(slot < 2);
            assert!(pool.busy_slots().await <= 2);
            if n >= 2 {
                // the third submission onwards had to wait for a result
                assert!(sink.results.lock().unwrap().len() >= n - 1);
            }
        }
        assert_eq!(pool.workers().await, 2);
        pool.wait_for_slots_to_finish(true).await.unwrap();

        let results = sink.results.lock().unwrap();
        assert_eq!(results.len(), 6);
        let mut ids = results.iter().map(|r| r.task_id.clone()).collect::<Vec<_>>();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 6);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
        drop(results);
        assert_eq!(pool.busy_slots().await, 0);
        assert_eq!(pool.workers().await, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_max_concurrent() {
        let (pool, gauge, sink) = pool(4);
        for _ in 0..4 {
            pool.schedule(task(), Some(1)).await.unwrap();
        }
        assert_eq!(pool.workers().await, 1);
        pool.wait_for_slots_to_finish(false).await.unwrap();
        assert_eq!(sink.results.lock().unwrap().len(), 4);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
        assert_eq!(pool.workers().await, 1);
        pool.stop().await.unwrap();
        assert_eq!(pool.workers().await, 0);
    }

    #[test]
    fn test_release_once() {
        let mut state = PoolState {
            slots: vec![Some("a".into()), None],
            workers: 1,
        };
        let result = ResultMessage {
            task_id: "a".into(),
            slot: 0,
            ..Default::default()
        };
        assert!(state.release(&result));
        assert!(!state.release(&result));
        assert!(!state.release(&ResultMessage {
            task_id: "b".into(),
            slot: 7,
            ..Default::default()
        }));
        assert_eq!(state.busy(), 0);
    }
}
