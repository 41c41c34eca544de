use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::{
    Result, ScrapeflowError,
    error::ActionError,
    pipeline::{
        Scope,
        actions::{Action, ActionResult, ActionType, from_params},
        template,
    },
    runtime::Item,
};

/// Collaborator failures become `error` severity so they are recorded
/// against the current item.
fn request_error(err: ScrapeflowError) -> ActionError {
    ActionError::error(err.to_string())
}

fn default_delay_ms() -> u64 {
    1_000
}

/// Fetches json into `target_field`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestJsonAction {
    url: String,
    target_field: String,
    #[serde(default)]
    url_field: Option<String>,
    /// pause after each request
    #[serde(default = "default_delay_ms")]
    delay_ms: u64,
}

#[async_trait]
impl Action for RequestJsonAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["url", "target_field"],
            "properties": {
                "url": { "type": "string" },
                "target_field": { "type": "string" },
                "url_field": { "type": "string" },
                "delay_ms": { "type": "integer", "minimum": 0 }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::RequestJson
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let url = template::render(&self.url, item)?;
        let data = scope.services().fetcher.fetch_json(&url).await.map_err(request_error)?;

        item.set_url(url.as_str());
        item.set_document(serde_json::to_string(&data)?);
        item.set(self.target_field.as_str(), data);
        if let Some(url_field) = &self.url_field {
            item.set(url_field.as_str(), url);
        }

        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        Ok(())
    }
}

/// Fetches raw html and makes it the current document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPageAction {
    url: String,
    #[serde(default)]
    url_field: Option<String>,
}

#[async_trait]
impl Action for RequestPageAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["url"],
            "properties": {
                "url": { "type": "string" },
                "url_field": { "type": "string" }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::RequestPage
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let url = template::render(&self.url, item)?;
        let page = scope.services().fetcher.fetch_page(&url).await.map_err(request_error)?;
        item.set_document(page);
        item.set_url(url.as_str());
        if let Some(url_field) = &self.url_field {
            item.set(url_field.as_str(), url);
        }
        Ok(())
    }
}

/// Runs a GraphQL query with templated variables.
///
/// With `target_field` the first entry of `data` is stored there; otherwise
/// `data.<query_name>` is merged into the item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestGraphqlAction {
    url: String,
    query: String,
    #[serde(default)]
    query_name: Option<String>,
    #[serde(default)]
    target_field: Option<String>,
    #[serde(default)]
    variables: Map<String, Value>,
}

impl RequestGraphqlAction {
    fn apply(
        &self,
        data: Map<String, Value>,
        item: &mut Item,
    ) -> ActionResult {
        if let Some(target) = &self.target_field {
            let first = data.into_iter().next().map(|(_, v)| v).unwrap_or(Value::Null);
            item.set(target.as_str(), first);
            return Ok(());
        }
        let name = self.query_name.as_deref().unwrap_or_default();
        match data.get(name) {
            Some(Value::Object(fields)) => {
                item.extend(fields.clone());
                Ok(())
            }
            Some(other) => Err(ActionError::error(format!("GraphQL result '{}' is not an object: {}", name, other))),
            None => Err(ActionError::error(format!("GraphQL result has no '{}'", name))),
        }
    }
}

#[async_trait]
impl Action for RequestGraphqlAction {
    fn create(params: Value) -> Result<Self> {
        let action: Self = from_params(params, &Self::schema())?;
        if action.target_field.is_none() && action.query_name.is_none() {
            return Err(ScrapeflowError::Action("request.graphql needs either target_field or query_name".into()));
        }
        Ok(action)
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["url", "query"],
            "properties": {
                "url": { "type": "string" },
                "query": { "type": "string" },
                "query_name": { "type": "string" },
                "target_field": { "type": "string" },
                "variables": { "type": "object" }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::RequestGraphql
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let url = template::render(&self.url, item)?;
        let variables = template::render_json(&Value::Object(self.variables.clone()), item)?;
        let response = scope.services().fetcher.fetch_graphql(&url, &self.query, &variables).await.map_err(request_error)?;

        item.set_url(url.as_str());
        item.set_document(serde_json::to_string(&response)?);
        match response.get("data") {
            Some(Value::Object(data)) => self.apply(data.clone(), item),
            _ => Err(ActionError::error(format!("GraphQL response from {} has no data", url))),
        }
    }
}

/// Loads a page through the browser, optionally waiting for `wait_css`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestBrowserAction {
    url: String,
    #[serde(default)]
    wait_css: Option<String>,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[async_trait]
impl Action for RequestBrowserAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["url"],
            "properties": {
                "url": { "type": "string" },
                "wait_css": { "type": "string" },
                "timeout_ms": { "type": "integer", "minimum": 0 }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::RequestBrowser
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let url = template::render(&self.url, item)?;
        let browser = &scope.services().browser;
        let timeout = self.timeout_ms.map(Duration::from_millis).unwrap_or_else(|| browser.wait_timeout());
        let driver = browser.driver().await?;

        let page = driver.load_page(&url, self.wait_css.as_deref(), timeout).await.map_err(request_error)?;
        let current = driver.current_url().await.unwrap_or_else(|_| url.clone());
        debug!("browser loaded {} ({})", url, current);
        item.set_url(current);
        item.set_document(page);
        Ok(())
    }
}

/// Clicks an element of the current browser page and refreshes the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserClickAction {
    selector: String,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    wait_css: Option<String>,
}

#[async_trait]
impl Action for BrowserClickAction {
    fn create(params: Value) -> Result<Self> {
        from_params(params, &Self::schema())
    }

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["selector"],
            "properties": {
                "selector": { "type": "string" },
                "optional": { "type": "boolean" },
                "wait_css": { "type": "string" }
            }
        })
    }

    fn action_type(&self) -> ActionType {
        ActionType::BrowserClick
    }

    async fn execute(
        &self,
        scope: &Scope<'_>,
        item: &mut Item,
    ) -> ActionResult {
        let browser = &scope.services().browser;
        let driver = browser.driver().await?;

        if let Err(err) = driver.click(&self.selector).await {
            if !self.optional {
                return Err(ActionError::error(format!("Element not found: {}", self.selector)));
            }
            debug!("optional click on {} skipped: {}", self.selector, err);
        }
        if let Some(wait_css) = &self.wait_css {
            if let Err(err) = driver.wait_for(wait_css, browser.wait_timeout()).await {
                if !self.optional {
                    return Err(ActionError::error(format!("Wait element not found: {}", wait_css)));
                }
                debug!("optional wait for {} skipped: {}", wait_css, err);
            }
        }

        item.set_document(driver.page_source().await.map_err(request_error)?);
        Ok(())
    }
}
