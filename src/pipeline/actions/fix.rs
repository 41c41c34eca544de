//! Maintenance nodes revisiting records that previously failed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::info;

use crate::{
    Result,
    error::ActionError,
    pipeline::{
        MarkerSettings, Scope,
        actions::{Action, ActionResult, ActionType, from_params},
        consts::{PROCESSED_ID_KEY, RECORD_ID_KEY},
        find_marker,
    },
    runtime::Item,
    store::{
        data::ProcessedStatus,
        query::{Cond, Query},
    },
};

/// Markers fetched per page while iterating.
const FIX_PAGE_SIZE: usize = 20;

/// Iterates the error markers of a scraper, running the children once per marker.
///
/// `take`, `filter` and `scraper_id` are looked up in the item first, then in
/// the node, then in the pipeline properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListErrorsAction {
    target_field: String,
    #[serde(default)]
    count_field: Option<String>,
    #[serde(default)]
    index_field: Option<String>,
}

#[async_trait]
impl Action for ListErrorsAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["target_field"],
            "properties": {
                "target_field": { "type": "string" },
                "count_field": { "type": "string" },
                "index_field": { "type": "string" },
                "take": { "type": ["integer", "string"] },
                "filter": { "type": "string" },
                "scraper_id": { "type": ["integer", "string"] }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::ListErrors
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let take = scope.lookup_i64("take", item, 0)?;
        let filter = scope.lookup_str("filter", item, "");
        let scraper_id = scope.lookup_str("scraper_id", item, &scope.ctx().info().scraper_id);

        let mut query = Query::new()
            .filter(Cond::eq("status", ProcessedStatus::Error.as_ref()))
            .filter(Cond::eq("scraper_id", scraper_id.as_str()))
            .order("timestamp", false)
            .order("id", false);
        if !filter.is_empty() {
            query = query.filter(Cond::contains("message", &filter));
        }

        let processed = scope.store().processed()?;
        let count = processed.count(&query)?;
        let total = if take > 0 && (take as usize) < count { take as usize } else { count };
        scope.ctx().log(&format!("Fixing {} records", total));
        scope.ctx().set_total_records(total as u64);
        if let Some(count_field) = &self.count_field {
            item.set(count_field.as_str(), total);
        }

        // children move markers out of the filter, so the set is read before any of them runs
        let mut markers = Vec::with_capacity(total);
        while markers.len() < total {
            let page = processed.query(&query.clone().set_limit(FIX_PAGE_SIZE).set_offset(markers.len()))?;
            if page.rows.is_empty() {
                info!("no more records to fix");
                break;
            }
            markers.extend(page.rows);
        }
        markers.truncate(total);

        let settings = MarkerSettings::from_properties(scope.properties());
        for (index, marker) in markers.into_iter().enumerate() {
            if !scope.ctx().is_running() {
                return Err(ActionError::ProcessAbort);
            }
            let data = serde_json::from_str::<Map<String, Value>>(&marker.data).unwrap_or_default();
            let mut target = match data.get(&settings.target) {
                Some(Value::Object(target)) => target.clone(),
                _ => Map::new(),
            };
            target.insert(RECORD_ID_KEY.to_string(), Value::String(marker.record_id.clone()));

            let mut branch = item.branch();
            if let Some(index_field) = &self.index_field {
                branch.set(index_field.as_str(), index);
            }
            branch.set(PROCESSED_ID_KEY, marker.id.clone());
            branch.set(self.target_field.as_str(), Value::Object(target));
            scope.execute_children(&mut branch).await?;
        }
        Ok(())
    }
}

/// Flags the current record's marker as fixed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkFixedAction {}

#[async_trait]
impl Action for MarkFixedAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({ "type": "object" })
    }

    fn action_type(&self) -> ActionType {
        ActionType::MarkFixed
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let store = scope.store();
        if let Some(mut marker) = find_marker(store, &scope.ctx().info().scraper_id, item)? {
            marker.status = ProcessedStatus::Fixed.to_string();
            marker.message = "fixed".to_string();
            store.processed()?.update(&marker)?;
            scope.ctx().log(&format!("Fixed record {}", marker.record_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        model::ActionConfig,
        pipeline::actions::testing,
        store::{Store, data::Processed},
        utils,
    };

    fn seed(
        store: &Arc<Store>,
        scraper_id: &str,
        record_id: &str,
        status: ProcessedStatus,
        message: &str,
    ) {
        store
            .processed()
            .unwrap()
            .create(&Processed {
                id: utils::longid(),
                record_id: record_id.into(),
                scraper_id: scraper_id.into(),
                status: status.to_string(),
                message: message.into(),
                data: json!({"result": {"title": format!("job {}", record_id)}}).to_string(),
                timestamp: 0,
            })
            .unwrap();
    }

    fn list_errors(children: Vec<ActionConfig>) -> ActionConfig {
        ActionConfig::new("Failed jobs (fix.list_errors)")
            .with_param("target_field", "job")
            .with_param("count_field", "total")
            .with_param("index_field", "i")
            .with_param("filter", "timeout")
            .with_children(children)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_and_mark_fixed() {
        let services = testing::factory().create().unwrap();
        let store = services.store.clone();
        for n in 0..45 {
            seed(&store, "scraper-test", &format!("r{}", n), ProcessedStatus::Error, "timeout at (http://x)");
        }
        seed(&store, "scraper-test", "other", ProcessedStatus::Error, "bad selector");
        seed(&store, "scraper-test", "done", ProcessedStatus::Processed, "timeout");
        seed(&store, "elsewhere", "foreign", ProcessedStatus::Error, "timeout");

        let log = ActionConfig::new("Show (log)").with_param("text", "${i}: ${job.title} (${job.record_id})");
        let outcome = testing::run(services.clone(), vec![list_errors(vec![log])], json!({"take": 30})).await;
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.item.get("total"), Some(&json!(30)));
        assert_eq!(outcome.ctx.total_records(), 30);
        let lines = outcome.ctx.log_text();
        assert!(lines.contains("Fixing 30 records"));
        assert!(lines.contains("29: job r"));
        assert!(!lines.contains("30: job"));

        // every listed marker gets fixed, which drains the error list
        let outcome = testing::run(services.clone(), vec![list_errors(vec![ActionConfig::new("Fixed (fix.mark_fixed)")])], json!({})).await;
        assert!(outcome.result.is_ok());
        assert_eq!(outcome.item.get("total"), Some(&json!(45)));
        assert_eq!(outcome.ctx.log_text().matches("Fixed record r").count(), 45);

        let fixed = store.processed().unwrap().count(&Query::new().filter(Cond::eq("status", "fixed"))).unwrap();
        assert_eq!(fixed, 45);
        let outcome = testing::run(services, vec![list_errors(vec![])], json!({})).await;
        assert_eq!(outcome.item.get("total"), Some(&json!(0)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lookup_order() {
        let services = testing::factory().create().unwrap();
        seed(&services.store, "a", "r1", ProcessedStatus::Error, "boom");
        seed(&services.store, "b", "r2", ProcessedStatus::Error, "boom");
        seed(&services.store, "b", "r3", ProcessedStatus::Error, "boom");

        let node = ActionConfig::new("Failed (fix.list_errors)").with_param("target_field", "job").with_param("count_field", "total").with_param("scraper_id", "a");
        let outcome = testing::run(services.clone(), vec![node.clone()], json!({})).await;
        assert_eq!(outcome.item.get("total"), Some(&json!(1)));

        // the item wins over the node
        let outcome = testing::run(services, vec![node], json!({"scraper_id": "b"})).await;
        assert_eq!(outcome.item.get("total"), Some(&json!(2)));
    }
}
