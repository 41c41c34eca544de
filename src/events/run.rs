use serde::Serialize;

use crate::model::RunStatus;

/// Events fired by the run queue.
#[derive(Debug, Clone, Serialize, strum::AsRefStr)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueueEvent {
    Started(RunStarted),
    Progress(Progress),
    Finished(RunSummary),
    Error(RunSummary),
    Aborted(RunSummary),
    /// No runs are in flight.
    Idle,
}

impl QueueEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueEvent::Finished(_) | QueueEvent::Error(_) | QueueEvent::Aborted(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, QueueEvent::Error(_))
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            QueueEvent::Finished(s) | QueueEvent::Error(s) | QueueEvent::Aborted(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStarted {
    pub scraper_name: String,
    pub hour: u32,
    pub minute: u32,
}

/// Final state of a run as reported to listeners and kept for lookups.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub scraper_id: String,
    pub scraper_name: String,
    pub status: RunStatus,
    pub succeeded: u64,
    pub failed: u64,
    pub existing: u64,
    pub skipped: u64,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub report: serde_json::Value,
    pub log: String,
}

/// Snapshot of a run's progress for live updates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Progress {
    pub scraper_name: String,
    pub message: String,
    pub current: u64,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub existing: u64,
    pub skipped: u64,
    /// whole run, seconds
    pub elapsed: f64,
    /// per record in the current step, seconds
    pub average: f64,
    /// `HH:MM:SS`
    pub estimated: String,
    pub step: Option<StepProgress>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StepProgress {
    pub name: String,
    pub index: u32,
    pub count: u32,
    pub elapsed: f64,
}
