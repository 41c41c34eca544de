//! Helpers shared by the action tests.

use std::sync::Arc;

use serde_json::Value;

use crate::{
    model::{ActionConfig, Properties},
    pipeline::{Pipeline, Registry, RunScope, actions::ActionResult},
    runtime::{Channel, ExecutionContext, Item, RunInfo, Services, ServicesFactory},
    store::MemConnector,
};

pub(crate) struct Outcome {
    pub ctx: Arc<ExecutionContext>,
    pub result: ActionResult,
    pub item: Item,
}

pub(crate) fn factory() -> ServicesFactory {
    ServicesFactory::new(Arc::new(MemConnector::new().unwrap()))
}

pub(crate) fn run_info() -> RunInfo {
    RunInfo {
        run_id: "run-test".into(),
        scraper_id: "scraper-test".into(),
        scraper_name: "test".into(),
        ..Default::default()
    }
}

pub(crate) async fn run_with(
    services: Services,
    registry: &Registry,
    actions: Vec<ActionConfig>,
    properties: Properties,
    item: Value,
) -> Outcome {
    let pipeline = Pipeline::from_actions(actions, properties, registry).await.unwrap();
    let ctx = Arc::new(ExecutionContext::new(run_info(), Arc::new(Channel::detached())));
    let scope = RunScope::new(ctx.clone(), services, pipeline.properties());
    let mut item = Item::from_value(item).unwrap();
    let result = scope.run(&pipeline, &mut item).await;
    Outcome {
        ctx,
        result,
        item,
    }
}

pub(crate) async fn run(
    services: Services,
    actions: Vec<ActionConfig>,
    item: Value,
) -> Outcome {
    run_with(services, &Registry::default(), actions, Properties::new(), item).await
}
