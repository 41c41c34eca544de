use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::warn;

use crate::{
    Result,
    collab::display,
    error::ActionError,
    model::Properties,
    pipeline::{
        ActionNode, Pipeline,
        actions::ActionResult,
        consts::{DEFAULT_PROCESSED_TARGET, MARKER_MESSAGE_LIMIT, PROCESSED_ID_KEY, PROCESSED_PROPERTY, RECORD_ID_KEY},
    },
    pool::WorkerPool,
    runtime::{ExecutionContext, Item, Services},
    store::{
        Store,
        data::{Processed, ProcessedStatus},
        query::{Cond, Query},
    },
    utils,
};

/// Everything one run of a pipeline executes against.
#[derive(Clone)]
pub struct RunScope {
    ctx: Arc<ExecutionContext>,
    services: Services,
    properties: Arc<Properties>,
    pool: Option<Arc<WorkerPool>>,
}

impl RunScope {
    pub fn new(
        ctx: Arc<ExecutionContext>,
        services: Services,
        properties: Arc<Properties>,
    ) -> Self {
        Self {
            ctx,
            services,
            properties,
            pool: None,
        }
    }

    /// Attaches the pool that sub-process nodes submit to.
    pub fn with_pool(
        mut self,
        pool: Arc<WorkerPool>,
    ) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn ctx(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn pool(&self) -> Option<&Arc<WorkerPool>> {
        self.pool.as_ref()
    }

    /// Runs `pipeline` from its root.
    pub async fn run(
        &self,
        pipeline: &Pipeline,
        item: &mut Item,
    ) -> ActionResult {
        pipeline.root().execute(self, item).await
    }
}

/// The view an action gets of its run and its own node.
pub struct Scope<'a> {
    run: &'a RunScope,
    node: &'a ActionNode,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(
        run: &'a RunScope,
        node: &'a ActionNode,
    ) -> Self {
        Self {
            run,
            node,
        }
    }

    pub fn run(&self) -> &RunScope {
        self.run
    }

    pub fn ctx(&self) -> &ExecutionContext {
        &self.run.ctx
    }

    pub fn services(&self) -> &Services {
        &self.run.services
    }

    pub fn store(&self) -> &Store {
        &self.run.services.store
    }

    pub fn properties(&self) -> &Properties {
        &self.run.properties
    }

    pub fn pool(&self) -> Option<&Arc<WorkerPool>> {
        self.run.pool.as_ref()
    }

    pub fn node(&self) -> &ActionNode {
        self.node
    }

    /// Executes this node's children against `item`.
    pub async fn execute_children(
        &self,
        item: &mut Item,
    ) -> ActionResult {
        self.node.execute_children(self.run, item).await
    }

    /// Looks `name` up in the item, then the node's parameters, then the shared properties.
    pub fn lookup(
        &self,
        name: &str,
        item: &Item,
    ) -> Option<Value> {
        item.get(name).or_else(|| self.node.config().param(name)).or_else(|| self.run.properties.get(name)).cloned()
    }

    pub fn lookup_i64(
        &self,
        name: &str,
        item: &Item,
        default: i64,
    ) -> std::result::Result<i64, ActionError> {
        match self.lookup(name, item) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => as_i64(&value).ok_or_else(|| ActionError::error(format!("'{}' must be a number, got {}", name, value))),
        }
    }

    pub fn lookup_str(
        &self,
        name: &str,
        item: &Item,
        default: &str,
    ) -> String {
        match self.lookup(name, item) {
            None | Some(Value::Null) => default.to_string(),
            Some(value) => display(&value),
        }
    }
}

/// Integer value of a number or numeric string.
pub(crate) fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Where markers keep the item data, and which item keys they leave out.
pub(crate) struct MarkerSettings {
    pub target: String,
    pub ignore: Vec<String>,
}

impl MarkerSettings {
    pub(crate) fn from_properties(properties: &Properties) -> Self {
        let section = properties.get(PROCESSED_PROPERTY);
        let target = section.and_then(|s| s.get("target")).and_then(Value::as_str).unwrap_or(DEFAULT_PROCESSED_TARGET).to_string();
        let ignore = section
            .and_then(|s| s.get("ignore"))
            .and_then(Value::as_array)
            .map(|keys| keys.iter().filter_map(Value::as_str).map(String::from).collect())
            .unwrap_or_default();
        Self {
            target,
            ignore,
        }
    }
}

/// Finds the processed marker of the current item, by marker id first and
/// external record id second.
pub(crate) fn find_marker(
    store: &Store,
    scraper_id: &str,
    item: &Item,
) -> Result<Option<Processed>> {
    let processed = store.processed()?;
    if let Some(id) = item.get(PROCESSED_ID_KEY).filter(|v| !v.is_null()) {
        let id = display(id);
        return Ok(if processed.exists(&id)? { Some(processed.find(&id)?) } else { None });
    }
    match item.get(RECORD_ID_KEY).filter(|v| !v.is_null()) {
        Some(record_id) => processed.find_first(&Query::new().filter(Cond::eq("record_id", display(record_id))).filter(Cond::eq("scraper_id", scraper_id))),
        None => Ok(None),
    }
}

fn update_marker(
    run: &RunScope,
    item: &Item,
    status: ProcessedStatus,
    message: &str,
) -> Result<bool> {
    let store = &run.services.store;
    let Some(mut marker) = find_marker(store, &run.ctx.info().scraper_id, item)? else {
        return Ok(false);
    };
    let settings = MarkerSettings::from_properties(&run.properties);
    let mut data = serde_json::from_str::<Map<String, Value>>(&marker.data).unwrap_or_default();
    let entry = data.entry(settings.target).or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(target) = entry {
        for (key, value) in item.to_map() {
            if !settings.ignore.contains(&key) {
                target.insert(key, value);
            }
        }
    }
    marker.status = status.to_string();
    marker.message = utils::truncate(message, MARKER_MESSAGE_LIMIT);
    marker.data = serde_json::to_string(&data)?;
    marker.timestamp = utils::time::time_millis();
    store.processed()?.update(&marker)
}

/// Records the failure on the item's processed marker, if it has one.
/// Persistence problems are logged and never raised.
pub(crate) fn persist_marker(
    run: &RunScope,
    item: &Item,
    status: ProcessedStatus,
    message: &str,
) {
    if let Err(err) = update_marker(run, item, status, message) {
        warn!("failed to update processed marker: {}", err);
    }
}
