use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    Result,
    collab::display,
    error::ActionError,
    pipeline::{
        Scope,
        actions::{Action, ActionResult, ActionType, from_params},
        consts::{PROCESSED_ID_KEY, RECORD_ID_KEY},
        template,
    },
    runtime::Item,
    store::{
        data::{Processed, ProcessedStatus, Record},
        query::{Cond, Query},
    },
    utils,
};

fn default_selector() -> String {
    RECORD_ID_KEY.to_string()
}

/// Natural id of the current record, read from `selector`.
fn record_id(
    item: &Item,
    selector: &str,
) -> std::result::Result<String, ActionError> {
    match template::resolve(item, selector)? {
        Value::Null => Err(ActionError::error(format!("Record id '{}' is empty", selector))),
        id => Ok(display(&id)),
    }
}

/// Find-or-create the processed marker of the current record.
///
/// A record seen before counts as existing and stops the current branch with
/// an `info` failure, so nothing below this node runs for it again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckProcessedAction {
    /// item path holding the record's natural id
    #[serde(default = "default_selector")]
    selector: String,
    /// item path of the data stored on the marker, the whole item when unset
    #[serde(default)]
    source_field: Option<String>,
}

#[async_trait]
impl Action for CheckProcessedAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "selector": { "type": "string" },
                "source_field": { "type": "string" }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::CheckProcessed
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let id = record_id(item, &self.selector)?;
        let scraper_id = scope.ctx().info().scraper_id.clone();
        let processed = scope.store().processed()?;

        let existing = processed.find_first(&Query::new().filter(Cond::eq("record_id", id.as_str())).filter(Cond::eq("scraper_id", scraper_id.as_str())))?;
        if let Some(existing) = existing {
            scope.ctx().add_existing(1);
            item.set(PROCESSED_ID_KEY, existing.id);
            return Err(ActionError::info(format!("Record {} has already been processed", id)));
        }

        let data = match &self.source_field {
            Some(field) => template::resolve(item, field)?,
            None => item.to_value(),
        };
        let marker = Processed {
            id: utils::longid(),
            record_id: id,
            scraper_id,
            status: ProcessedStatus::Processed.to_string(),
            message: String::new(),
            data: serde_json::to_string(&data)?,
            timestamp: utils::time::time_millis(),
        };
        processed.create(&marker)?;
        debug!("created processed marker {} for {}", marker.id, marker.record_id);
        item.set(PROCESSED_ID_KEY, marker.id);
        Ok(())
    }
}

/// Stores the current item as a scraped record and counts it as succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveRecordAction {
    #[serde(default = "default_selector")]
    selector: String,
    /// item path of the data to store, the whole item when unset
    #[serde(default)]
    source_field: Option<String>,
}

#[async_trait]
impl Action for SaveRecordAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "selector": { "type": "string" },
                "source_field": { "type": "string" }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::SaveRecord
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let record_id = match template::resolve(item, &format!("?{}", self.selector.trim_start_matches('?')))? {
            Value::Null => String::new(),
            id => display(&id),
        };
        let data = match &self.source_field {
            Some(field) => template::resolve(item, field)?,
            None => item.to_value(),
        };
        scope.store().records()?.create(&Record {
            id: utils::longid(),
            record_id,
            scraper_id: scope.ctx().info().scraper_id.clone(),
            url: item.url().to_string(),
            data: serde_json::to_string(&data)?,
            timestamp: utils::time::time_millis(),
        })?;
        scope.ctx().add_succeeded(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{model::ActionConfig, pipeline::actions::testing};

    fn check() -> ActionConfig {
        ActionConfig::new("Seen (check_processed)").with_param("selector", "job.id").with_param("source_field", "job")
    }

    fn save() -> ActionConfig {
        ActionConfig::new("Save (save_record)").with_param("selector", "job.id")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_check_processed_then_save() {
        let services = testing::factory().create().unwrap();
        let store = services.store.clone();
        let item = json!({"job": {"id": 42, "title": "Welder"}});

        let outcome = testing::run(services.clone(), vec![check(), save()], item.clone()).await;
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.ctx.tally().succeeded, 1);
        let marker_id = outcome.item.get(PROCESSED_ID_KEY).cloned().unwrap();

        let markers = store.processed().unwrap().query(&Query::new()).unwrap();
        assert_eq!(markers.count, 1);
        assert_eq!(markers.rows[0].record_id, "42");
        assert_eq!(markers.rows[0].status, "processed");
        assert_eq!(serde_json::from_str::<Value>(&markers.rows[0].data).unwrap(), json!({"id": 42, "title": "Welder"}));

        let records = store.records().unwrap().query(&Query::new()).unwrap();
        assert_eq!(records.count, 1);
        assert_eq!(records.rows[0].record_id, "42");
        assert_eq!(records.rows[0].scraper_id, "scraper-test");

        // second sighting: counted as existing, recorded as info, nothing saved
        let outcome = testing::run(services, vec![check(), save()], item).await;
        assert!(outcome.result.is_ok());
        let tally = outcome.ctx.tally();
        assert_eq!((tally.existing, tally.succeeded, tally.failed), (1, 0, 0));
        assert!(tally.info[0].starts_with("Record 42 has already been processed"));
        assert_eq!(outcome.item.get(PROCESSED_ID_KEY), Some(&marker_id));
        assert_eq!(store.records().unwrap().count(&Query::new()).unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_check_processed_requires_id() {
        let services = testing::factory().create().unwrap();
        let outcome = testing::run(services, vec![check()], json!({"job": {"id": null}})).await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.ctx.tally().failed, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_error_marker_persisted() {
        let services = testing::factory().create().unwrap();
        let store = services.store.clone();
        let failing = ActionConfig::new("Title (eval)").with_param("expression", "nothing + 1").with_param("target_field", "x");
        let outcome = testing::run(services, vec![check(), failing], json!({"job": {"id": "a-1"}, "secret": 1})).await;
        assert!(outcome.result.is_err());

        let marker = store.processed().unwrap().query(&Query::new()).unwrap().rows.remove(0);
        assert_eq!(marker.status, "error");
        assert!(!marker.message.is_empty());
        let data = serde_json::from_str::<Value>(&marker.data).unwrap();
        assert_eq!(data["result"]["job"], json!({"id": "a-1"}));
        assert_eq!(data["id"], json!("a-1"));
    }
}
