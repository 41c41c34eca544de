//! Messages crossing the boundary between the pool and its workers.
//!
//! Everything here is plain serializable data. Workers acquire their own
//! collaborators; no handle ever travels inside a message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    model::{ActionConfig, Properties},
    runtime::Tally,
};

/// A sub-tree to run in a worker, with the item it starts from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskMessage {
    /// unique per submission, used to apply each result once
    pub task_id: String,
    /// slot assigned by the pool
    pub slot: usize,
    pub run_id: String,
    pub scraper_id: String,
    #[serde(default)]
    pub scraper_name: String,
    pub actions: Vec<ActionConfig>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub item: Map<String, Value>,
}

/// Outcome of one task, folded into the parent run's context.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultMessage {
    pub task_id: String,
    pub slot: usize,
    pub run_id: String,
    pub tally: Tally,
    /// human readable summary of the sub-run
    #[serde(default)]
    pub message: String,
}

impl ResultMessage {
    /// Result standing in for a task whose worker never reported back.
    pub fn failed(
        task: &TaskMessage,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            task_id: task.task_id.clone(),
            slot: task.slot,
            run_id: task.run_id.clone(),
            tally: Tally {
                failed: 1,
                errors: vec![message.clone()],
                ..Default::default()
            },
            message,
        }
    }
}

/// One line of the pool-to-worker protocol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerCommand {
    Run(TaskMessage),
    /// Release resources and exit.
    Shutdown,
}
