use std::{
    sync::{
        Arc, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::{
    Result, ScrapeflowError,
    events::{Log, Message, Progress, QueueEvent, StepProgress},
    pool::merge_reports,
    runtime::Channel,
    utils,
};

/// Identity of the run a context belongs to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunInfo {
    pub run_id: String,
    pub scraper_id: String,
    pub scraper_name: String,
    pub scraper_kind: String,
}

/// Counters, messages and reports produced by a run.
///
/// This is the part of a context that a sub-run ships back to its parent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Tally {
    pub succeeded: u64,
    pub failed: u64,
    pub existing: u64,
    pub skipped: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub info: Vec<String>,
    pub reports: Map<String, Value>,
}

#[derive(Debug)]
struct ContextState {
    tally: Tally,
    log: Vec<String>,
    steps: u32,
    step: u32,
    step_name: String,
    step_started: Instant,
    total_records: u64,
    current_record: u64,
}

/// Mutable per-run state shared by every action of one run.
pub struct ExecutionContext {
    info: RunInfo,
    running: AtomicBool,
    state: RwLock<ContextState>,
    channel: Arc<Channel>,
    started: Instant,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ExecutionContext").field("info", &self.info).field("running", &self.is_running()).finish()
    }
}

/// Average time per record: `elapsed / max(current, 1)`.
pub fn average_time(
    elapsed: Duration,
    current: u64,
) -> Duration {
    elapsed.div_f64(current.max(1) as f64)
}

/// Remaining time estimate: `average × (total − current)`, never negative
/// and saturating at [`Duration::MAX`].
pub fn estimated_time(
    average: Duration,
    total: u64,
    current: u64,
) -> Duration {
    Duration::try_from_secs_f64(average.as_secs_f64() * total.saturating_sub(current) as f64).unwrap_or(Duration::MAX)
}

impl ExecutionContext {
    pub fn new(
        info: RunInfo,
        channel: Arc<Channel>,
    ) -> Self {
        let now = Instant::now();
        Self {
            info,
            running: AtomicBool::new(true),
            state: RwLock::new(ContextState {
                tally: Tally::default(),
                log: Vec::new(),
                steps: 0,
                step: 0,
                step_name: String::new(),
                step_started: now,
                total_records: 0,
                current_record: 0,
            }),
            channel,
            started: now,
        }
    }

    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    pub fn run_id(&self) -> &str {
        &self.info.run_id
    }

    /// Cooperative cancellation flag.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn read<R>(
        &self,
        f: impl FnOnce(&ContextState) -> R,
    ) -> R {
        match self.state.read() {
            Ok(state) => f(&state),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn write<R>(
        &self,
        f: impl FnOnce(&mut ContextState) -> R,
    ) -> R {
        match self.state.write() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Mutates the tally under the state lock.
    pub fn update<R>(
        &self,
        f: impl FnOnce(&mut Tally) -> R,
    ) -> R {
        self.write(|state| f(&mut state.tally))
    }

    pub fn tally(&self) -> Tally {
        self.read(|state| state.tally.clone())
    }

    pub fn add_succeeded(
        &self,
        n: u64,
    ) {
        self.update(|t| t.succeeded += n);
    }

    pub fn add_existing(
        &self,
        n: u64,
    ) {
        self.update(|t| t.existing += n);
    }

    pub fn add_skipped(
        &self,
        n: u64,
    ) {
        self.update(|t| t.skipped += n);
    }

    /// Records an error and counts it as a failure.
    pub fn record_error(
        &self,
        message: &str,
    ) {
        self.update(|t| {
            t.errors.push(message.to_string());
            t.failed += 1;
        });
    }

    pub fn record_warning(
        &self,
        message: &str,
    ) {
        self.update(|t| t.warnings.push(message.to_string()));
    }

    pub fn record_info(
        &self,
        message: &str,
    ) {
        self.update(|t| t.info.push(message.to_string()));
    }

    pub fn has_errors(&self) -> bool {
        self.read(|state| !state.tally.errors.is_empty())
    }

    /// Merges a report fragment into the run's reports.
    pub fn report(
        &self,
        fragment: &Map<String, Value>,
    ) -> Result<()> {
        self.write(|state| merge_reports(&mut state.tally.reports, fragment))
    }

    /// Folds a sub-run's tally into this context.
    pub fn absorb(
        &self,
        other: &Tally,
    ) -> Result<()> {
        self.write(|state| {
            merge_reports(&mut state.tally.reports, &other.reports)
                .map_err(|e| ScrapeflowError::Merge(format!("run {}: {}", self.info.run_id, e)))?;
            let tally = &mut state.tally;
            tally.succeeded += other.succeeded;
            tally.failed += other.failed;
            tally.existing += other.existing;
            tally.skipped += other.skipped;
            tally.errors.extend(other.errors.iter().cloned());
            tally.warnings.extend(other.warnings.iter().cloned());
            tally.info.extend(other.info.iter().cloned());
            Ok(())
        })
    }

    /// Appends a line to the run log and mirrors it to listeners.
    pub fn log(
        &self,
        message: &str,
    ) {
        let line = format!("[{}] {}", utils::time::now_local().format("%H:%M:%S"), message);
        info!(run = %self.info.run_id, scraper = %self.info.scraper_name, "{}", message);
        self.write(|state| state.log.push(line));
        self.channel.emit_log(Log {
            run_id: self.info.run_id.clone(),
            scraper_id: self.info.scraper_id.clone(),
            content: message.to_string(),
            timestamp: utils::time::time_millis(),
        });
    }

    pub fn log_text(&self) -> String {
        self.read(|state| state.log.join("\n"))
    }

    /// Logs, advances the current record counter by `increase` and pushes a
    /// progress event to the owning queue.
    pub fn log_progress(
        &self,
        message: &str,
        increase: u64,
    ) {
        self.write(|state| state.current_record += increase);
        self.log(message);
        let progress = self.progress(message);
        self.channel.emit(Message::new(&self.info.run_id, &self.info.scraper_id, QueueEvent::Progress(progress)));
    }

    pub fn set_steps(
        &self,
        steps: u32,
    ) {
        self.write(|state| state.steps = steps);
    }

    /// Starts a new step: resets the record counter and the step timer and
    /// logs the step name. The record total is kept.
    pub fn start_step(
        &self,
        name: &str,
        index: Option<u32>,
    ) {
        self.write(|state| {
            state.step = index.unwrap_or(state.step + 1);
            state.steps = state.steps.max(state.step);
            state.step_name = name.to_string();
            state.step_started = Instant::now();
            state.current_record = 0;
        });
        self.log(name);
    }

    pub fn set_total_records(
        &self,
        total: u64,
    ) {
        self.write(|state| state.total_records = total);
    }

    pub fn current_record(&self) -> u64 {
        self.read(|state| state.current_record)
    }

    pub fn total_records(&self) -> u64 {
        self.read(|state| state.total_records)
    }

    /// Wall-clock time since the run started.
    pub fn elapsed_time(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn step_elapsed(&self) -> Duration {
        self.read(|state| state.step_started.elapsed())
    }

    pub fn average_time(&self) -> Duration {
        self.read(|state| average_time(state.step_started.elapsed(), state.current_record))
    }

    pub fn estimated_time_remaining(&self) -> Duration {
        self.read(|state| estimated_time(average_time(state.step_started.elapsed(), state.current_record), state.total_records, state.current_record))
    }

    pub fn progress(
        &self,
        message: &str,
    ) -> Progress {
        self.read(|state| {
            let step_elapsed = state.step_started.elapsed();
            let average = average_time(step_elapsed, state.current_record);
            Progress {
                scraper_name: self.info.scraper_name.clone(),
                message: message.to_string(),
                current: state.current_record,
                total: state.total_records,
                succeeded: state.tally.succeeded,
                failed: state.tally.failed,
                existing: state.tally.existing,
                skipped: state.tally.skipped,
                elapsed: utils::time::round_secs(self.started.elapsed()),
                average: utils::time::round_secs(average),
                estimated: utils::time::format_hms(estimated_time(average, state.total_records, state.current_record)),
                step: (state.steps > 0).then(|| StepProgress {
                    name: state.step_name.clone(),
                    index: state.step,
                    count: state.steps,
                    elapsed: utils::time::round_secs(step_elapsed),
                }),
            }
        })
    }

    /// Emits an arbitrary queue event on behalf of this run.
    pub(crate) fn emit(
        &self,
        event: QueueEvent,
    ) {
        self.channel.emit(Message::new(&self.info.run_id, &self.info.scraper_id, event));
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn context() -> ExecutionContext {
        ExecutionContext::new(
            RunInfo {
                run_id: "run-1".into(),
                scraper_id: "s1".into(),
                scraper_name: "jobs".into(),
                ..Default::default()
            },
            Arc::new(Channel::detached()),
        )
    }

    #[test]
    fn test_timing_formulas() {
        assert_eq!(average_time(Duration::from_secs(10), 0), Duration::from_secs(10));
        assert_eq!(average_time(Duration::from_secs(10), 4), Duration::from_millis(2500));
        assert_eq!(estimated_time(Duration::from_secs(2), 10, 4), Duration::from_secs(12));
        assert_eq!(estimated_time(Duration::from_secs(2), 3, 4), Duration::ZERO);
        assert_eq!(estimated_time(Duration::from_secs(2), u64::MAX, 0), Duration::MAX);
    }

    #[test]
    fn test_counters_and_messages() {
        let ctx = context();
        ctx.add_succeeded(2);
        ctx.record_error("boom");
        ctx.record_warning("odd");
        ctx.record_info("fyi");
        let tally = ctx.tally();
        assert_eq!(tally.succeeded, 2);
        assert_eq!(tally.failed, 1);
        assert_eq!(tally.errors, vec!["boom"]);
        assert_eq!(tally.warnings, vec!["odd"]);
        assert_eq!(tally.info, vec!["fyi"]);
        assert!(ctx.has_errors());
    }

    #[test]
    fn test_stop() {
        let ctx = context();
        assert!(ctx.is_running());
        ctx.stop();
        assert!(!ctx.is_running());
    }

    #[test]
    fn test_steps_and_progress() {
        let ctx = context();
        ctx.set_steps(3);
        ctx.start_step("listing", None);
        ctx.set_total_records(10);
        ctx.log_progress("page 1", 1);
        ctx.log_progress("page 2", 1);

        let progress = ctx.progress("now");
        assert_eq!(progress.current, 2);
        assert_eq!(progress.total, 10);
        let step = progress.step.unwrap();
        assert_eq!(step.name, "listing");
        assert_eq!(step.index, 1);
        assert_eq!(step.count, 3);

        ctx.start_step("details", None);
        assert_eq!(ctx.current_record(), 0);
        assert_eq!(ctx.total_records(), 10);
        assert_eq!(ctx.progress("x").step.unwrap().index, 2);
        let log = ctx.log_text();
        assert_eq!(log.lines().count(), 4);
        assert!(log.lines().next().unwrap().ends_with("listing"));
        assert!(log.lines().last().unwrap().ends_with("details"));
    }

    #[test]
    fn test_absorb() {
        let ctx = context();
        ctx.add_succeeded(1);
        ctx.report(json!({"pages": 1}).as_object().unwrap()).unwrap();

        let other = Tally {
            succeeded: 3,
            failed: 1,
            existing: 2,
            skipped: 1,
            errors: vec!["e".into()],
            warnings: vec!["w".into()],
            info: vec![],
            reports: json!({"pages": 2, "ids": [1]}).as_object().cloned().unwrap(),
        };
        ctx.absorb(&other).unwrap();
        let tally = ctx.tally();
        assert_eq!((tally.succeeded, tally.failed, tally.existing, tally.skipped), (4, 1, 2, 1));
        assert_eq!(Value::Object(tally.reports), json!({"pages": 3, "ids": [1]}));

        let bad = Tally {
            succeeded: 10,
            reports: json!({"pages": "many"}).as_object().cloned().unwrap(),
            ..Default::default()
        };
        assert!(ctx.absorb(&bad).is_err());
        assert_eq!(ctx.tally().succeeded, 4);
    }
}
