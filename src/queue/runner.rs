use std::{sync::Arc, time::Instant};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
    Result,
    error::{ActionError, Severity},
    events::{Message, QueueEvent, RunStarted, RunSummary},
    model::RunStatus,
    pipeline::{Pipeline, RunScope, actions::ActionResult},
    queue::{QueueInner, RunRequest, inflight::ExecutionItem, report},
    runtime::{ExecutionContext, Item, RunInfo},
    store::data::Run,
    utils,
};

/// Persists the run record, registers the run and announces it.
pub(crate) fn start_task(
    inner: &QueueInner,
    request: RunRequest,
) -> Result<Arc<ExecutionItem>> {
    let run_id = utils::longid();
    let run = Run {
        id: run_id.clone(),
        scraper_id: request.scraper.id.clone(),
        status: RunStatus::Running.to_string(),
        start_time: utils::time::time_millis(),
        day: request.day as i64,
        hour: request.hour as i64,
        minute: request.minute as i64,
        ..Default::default()
    };
    inner.services.store.runs()?.create(&run)?;

    let info = RunInfo {
        run_id,
        scraper_id: request.scraper.id.clone(),
        scraper_name: request.scraper.name.clone(),
        scraper_kind: request.scraper.kind.clone(),
    };
    let ctx = Arc::new(ExecutionContext::new(info, inner.channel.clone()));
    let item = Arc::new(ExecutionItem {
        ctx: ctx.clone(),
        request,
        run,
        started: Instant::now(),
    });
    inner.runs.insert(item.clone());

    info!("run {} of '{}' started", ctx.run_id(), ctx.info().scraper_name);
    ctx.emit(QueueEvent::Started(RunStarted {
        scraper_name: ctx.info().scraper_name.clone(),
        hour: item.request.hour,
        minute: item.request.minute,
    }));
    Ok(item)
}

/// Runs the scraper's pipeline and finishes the task with the resulting status.
pub(crate) async fn execute_task(
    inner: &QueueInner,
    item: Arc<ExecutionItem>,
) -> RunSummary {
    let ctx = item.ctx.clone();
    let status = match run_pipeline(inner, &item).await {
        Ok(()) if !ctx.has_errors() => RunStatus::Success,
        Ok(()) => RunStatus::Fail,
        Err(ActionError::ProcessAbort) => {
            // workers are relaunched by the next schedule
            if let Err(err) = inner.pool.wait_for_slots_to_finish(true).await {
                warn!("run {} could not drain its processes: {}", ctx.run_id(), err);
            }
            RunStatus::Aborted
        }
        Err(ActionError::Unexpected(message))
        | Err(ActionError::Raised {
            severity: Severity::Fatal,
            message,
        }) => {
            error!("run {} failed: {}", ctx.run_id(), message);
            ctx.record_error(&format!("Error starting scraper: {}", message));
            RunStatus::Fail
        }
        Err(err) => {
            debug!("run {} ended early: {}", ctx.run_id(), err);
            RunStatus::Fail
        }
    };
    finish_task(inner, &item, status).await
}

async fn run_pipeline(
    inner: &QueueInner,
    item: &ExecutionItem,
) -> ActionResult {
    let model = item.request.scraper.pipeline()?.with_properties(&item.request.properties);
    let pipeline = Pipeline::load(&model, &inner.registry).await?;
    let scope = RunScope::new(item.ctx.clone(), inner.services.clone(), pipeline.properties()).with_pool(inner.pool.clone());
    let mut record = Item::from_map(item.request.properties.clone());
    scope.run(&pipeline, &mut record).await
}

/// Notifies, persists the final record, forgets the run and fires its terminal event.
pub(crate) async fn finish_task(
    inner: &QueueInner,
    item: &ExecutionItem,
    status: RunStatus,
) -> RunSummary {
    let ctx = &item.ctx;
    let tally = ctx.tally();
    let summary = RunSummary {
        run_id: ctx.run_id().to_string(),
        scraper_id: ctx.info().scraper_id.clone(),
        scraper_name: ctx.info().scraper_name.clone(),
        status,
        succeeded: tally.succeeded,
        failed: tally.failed,
        existing: tally.existing,
        skipped: tally.skipped,
        errors: tally.errors.clone(),
        warnings: tally.warnings.clone(),
        report: Value::Object(tally.reports.clone()),
        log: ctx.log_text(),
    };

    if inner.config.mail.enabled {
        let mail = report::build_mail(&summary, item.started.elapsed(), &inner.config.mail);
        if let Err(err) = inner.mailer.send_mail(&mail).await {
            warn!("failed to send summary of run {}: {}", summary.run_id, err);
        }
    }

    let mut run = item.run.clone();
    run.status = status.to_string();
    run.end_time = utils::time::time_millis();
    run.succeeded = tally.succeeded as i64;
    run.failed = tally.failed as i64;
    run.existing = tally.existing as i64;
    run.skipped = tally.skipped as i64;
    run.message = tally.errors.first().cloned().unwrap_or_default();
    run.log = summary.log.clone();
    run.report = summary.report.to_string();
    if let Err(err) = inner.services.store.runs().and_then(|runs| runs.update(&run)) {
        error!("failed to persist run {}: {}", run.id, err);
    }

    inner.runs.remove(&summary.run_id);
    inner.summaries.set(summary.run_id.clone(), summary.clone());
    info!("run {} finished with: {}", summary.run_id, status);

    ctx.emit(match status {
        RunStatus::Fail => QueueEvent::Error(summary.clone()),
        RunStatus::Aborted => QueueEvent::Aborted(summary.clone()),
        RunStatus::Success | RunStatus::Running => QueueEvent::Finished(summary.clone()),
    });
    if inner.runs.is_empty() {
        inner.channel.emit(Message::new("", "", QueueEvent::Idle));
    }
    summary
}
