use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::Instant,
};

use tracing::warn;

use crate::{
    Result, ScrapeflowError,
    pool::{ResultMessage, ResultSink},
    queue::RunRequest,
    runtime::ExecutionContext,
    store::data::Run,
};

/// A run the queue started and has not finished yet.
pub struct ExecutionItem {
    pub ctx: Arc<ExecutionContext>,
    pub request: RunRequest,
    /// the persisted record as created at start
    pub run: Run,
    pub started: Instant,
}

/// In-flight runs keyed by run id.
///
/// Worker results are routed here and folded into the context of the run
/// that submitted them.
#[derive(Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<String, Arc<ExecutionItem>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &self,
        item: Arc<ExecutionItem>,
    ) {
        let run_id = item.ctx.run_id().to_string();
        match self.runs.write() {
            Ok(mut runs) => runs.insert(run_id, item),
            Err(poisoned) => poisoned.into_inner().insert(run_id, item),
        };
    }

    pub fn remove(
        &self,
        run_id: &str,
    ) -> Option<Arc<ExecutionItem>> {
        match self.runs.write() {
            Ok(mut runs) => runs.remove(run_id),
            Err(poisoned) => poisoned.into_inner().remove(run_id),
        }
    }

    pub fn get(
        &self,
        run_id: &str,
    ) -> Option<Arc<ExecutionItem>> {
        match self.runs.read() {
            Ok(runs) => runs.get(run_id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(run_id).cloned(),
        }
    }

    pub fn items(&self) -> Vec<Arc<ExecutionItem>> {
        match self.runs.read() {
            Ok(runs) => runs.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self.runs.read() {
            Ok(runs) => runs.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultSink for RunRegistry {
    fn apply(
        &self,
        result: &ResultMessage,
    ) -> Result<()> {
        let item = self.get(&result.run_id).ok_or_else(|| ScrapeflowError::Queue(format!("Process with run id {} does not exist", result.run_id)))?;
        if let Err(err) = item.ctx.absorb(&result.tally) {
            warn!("dropping result of task {}: {}", result.task_id, err);
            item.ctx.record_error(&err.to_string());
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::runtime::{Channel, RunInfo, Tally};

    fn item(run_id: &str) -> Arc<ExecutionItem> {
        Arc::new(ExecutionItem {
            ctx: Arc::new(ExecutionContext::new(
                RunInfo {
                    run_id: run_id.into(),
                    ..Default::default()
                },
                Arc::new(Channel::detached()),
            )),
            request: RunRequest::default(),
            run: Run::default(),
            started: Instant::now(),
        })
    }

    fn result(
        run_id: &str,
        tally: Tally,
    ) -> ResultMessage {
        ResultMessage {
            task_id: "t".into(),
            run_id: run_id.into(),
            tally,
            ..Default::default()
        }
    }

    #[test]
    fn test_results_route_by_run() {
        let registry = RunRegistry::new();
        let (a, b) = (item("a"), item("b"));
        registry.insert(a.clone());
        registry.insert(b.clone());

        let tally = Tally {
            succeeded: 2,
            ..Default::default()
        };
        registry.apply(&result("b", tally)).unwrap();
        assert_eq!(a.ctx.tally().succeeded, 0);
        assert_eq!(b.ctx.tally().succeeded, 2);

        let err = registry.apply(&result("gone", Tally::default())).unwrap_err();
        assert_eq!(err.to_string(), "Process with run id gone does not exist");

        assert!(registry.remove("a").is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_merge_conflict_is_recorded() {
        let registry = RunRegistry::new();
        let run = item("a");
        registry.insert(run.clone());
        run.ctx.report(json!({"pages": 1}).as_object().unwrap()).unwrap();

        let tally = Tally {
            reports: json!({"pages": {"x": 1}}).as_object().cloned().unwrap(),
            ..Default::default()
        };
        assert!(registry.apply(&result("a", tally)).is_err());
        assert_eq!(run.ctx.tally().failed, 1);
    }
}
