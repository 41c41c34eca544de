pub mod control;
pub mod eval;
pub mod extract;
pub mod fix;
pub mod log;
pub mod multiprocess;
pub mod record;
pub mod request;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    Result, ScrapeflowError,
    error::ActionError,
    pipeline::Scope,
    runtime::Item,
};

pub use control::{ErrorBoundaryAction, ForEachAction, IfAction, RepeatAction, WrapperAction};
pub use eval::EvalAction;
pub use extract::{ExtractDocFieldsAction, ExtractDocGroupsAction, ExtractJsonFieldsAction};
pub use fix::{ListErrorsAction, MarkFixedAction};
pub use log::{LogAction, LogProgressAction, LogStepAction};
pub use multiprocess::{MergeProcessesAction, StartProcessAction};
pub use record::{CheckProcessedAction, SaveRecordAction};
pub use request::{BrowserClickAction, RequestBrowserAction, RequestGraphqlAction, RequestJsonAction, RequestPageAction};

/// Outcome of one action execution.
pub type ActionResult = std::result::Result<(), ActionError>;

/// Kind ids of the built-in actions, as written in the name suffix of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString, strum::Display, strum::EnumIter)]
pub enum ActionType {
    #[strum(serialize = "pipeline.wrapper")]
    Wrapper,
    #[strum(serialize = "controls.if")]
    If,
    #[strum(serialize = "controls.for_each")]
    ForEach,
    #[strum(serialize = "controls.repeat")]
    Repeat,
    #[strum(serialize = "controls.error_boundary")]
    ErrorBoundary,
    #[strum(serialize = "eval")]
    Eval,
    #[strum(serialize = "log")]
    Log,
    #[strum(serialize = "log_step")]
    LogStep,
    #[strum(serialize = "log_progress")]
    LogProgress,
    #[strum(serialize = "request.json")]
    RequestJson,
    #[strum(serialize = "request.page")]
    RequestPage,
    #[strum(serialize = "request.graphql")]
    RequestGraphql,
    #[strum(serialize = "request.browser")]
    RequestBrowser,
    #[strum(serialize = "browser.click")]
    BrowserClick,
    #[strum(serialize = "extract.json_fields")]
    ExtractJsonFields,
    #[strum(serialize = "extract.doc_fields")]
    ExtractDocFields,
    #[strum(serialize = "extract.doc_groups")]
    ExtractDocGroups,
    #[strum(serialize = "check_processed")]
    CheckProcessed,
    #[strum(serialize = "save_record")]
    SaveRecord,
    #[strum(serialize = "multiprocessing.start")]
    StartProcess,
    #[strum(serialize = "multiprocessing.merge")]
    MergeProcesses,
    #[strum(serialize = "fix.list_errors")]
    ListErrors,
    #[strum(serialize = "fix.mark_fixed")]
    MarkFixed,
    /// Registered from outside the crate.
    #[strum(serialize = "custom")]
    Custom,
}

#[async_trait]
pub trait Action: Send + Sync {
    /// Creates a new instance of the action from the node's parameters.
    ///
    /// # Arguments
    ///
    /// * `params` - The [`serde_json::Value`] holding every key of the node except
    ///   `name`, `boundary`, `if` and `CHILDREN`.
    fn create(params: Value) -> Result<Self>
    where
        Self: Sized;

    /// Returns the json schema the parameters are validated against.
    fn schema() -> Value
    where
        Self: Sized;

    fn action_type(&self) -> ActionType;

    /// Resolves static configuration once, before any run.
    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Whether the node's children are built into live nodes. Actions that
    /// ship their children elsewhere return `false`.
    fn builds_children(&self) -> bool {
        true
    }

    /// Executes the action against the current item.
    ///
    /// # Arguments
    ///
    /// * `scope` - The run and node the action executes in.
    /// * `item` - The record of the current traversal path.
    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult;
}

/// Validates `params` against `schema` and deserializes them.
pub(crate) fn from_params<T: DeserializeOwned>(
    params: Value,
    schema: &Value,
) -> Result<T> {
    let validator = jsonschema::validator_for(schema).map_err(|e| ScrapeflowError::Action(format!("invalid schema: {}", e)))?;
    validator.validate(&params).map_err(|e| ScrapeflowError::Action(e.to_string()))?;
    serde_json::from_value::<T>(params).map_err(|e| ScrapeflowError::Action(e.to_string()))
}

/// Step total for `pages` pages of `per_page` records. Negative counts give
/// zero and oversized ones saturate.
pub(crate) fn estimated_records(
    pages: i64,
    per_page: usize,
) -> u64 {
    u64::try_from(pages).unwrap_or(0).saturating_mul(per_page as u64)
}

fn default_true() -> bool {
    true
}
