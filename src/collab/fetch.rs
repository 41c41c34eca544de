use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::{Result, ScrapeflowError, config::HttpConfig};

/// HTTP and GraphQL access used by request nodes.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_json(
        &self,
        url: &str,
    ) -> Result<Value>;

    async fn fetch_graphql(
        &self,
        url: &str,
        query: &str,
        variables: &Value,
    ) -> Result<Value>;

    async fn fetch_page(
        &self,
        url: &str,
    ) -> Result<String>;
}

/// [`Fetcher`] backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ScrapeflowError::Fetch(e.to_string()))?;
        Ok(Self {
            client,
        })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<reqwest::Response> {
        let res = request.send().await.map_err(|err| ScrapeflowError::Fetch(format!("Http error: {}", err)))?;
        if !res.status().is_success() {
            return Err(ScrapeflowError::Fetch(format!("{} returned status {}", url, res.status())));
        }
        Ok(res)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_json(
        &self,
        url: &str,
    ) -> Result<Value> {
        debug!("fetch_json({})", url);
        let res = self.send(self.client.get(url).header("accept", "application/json"), url).await?;
        res.json::<Value>().await.map_err(|err| ScrapeflowError::Fetch(format!("invalid json from {}: {}", url, err)))
    }

    async fn fetch_graphql(
        &self,
        url: &str,
        query: &str,
        variables: &Value,
    ) -> Result<Value> {
        debug!("fetch_graphql({})", url);
        let body = json!({ "query": query, "variables": variables });
        let res = self.send(self.client.post(url).json(&body), url).await?;
        let value = res.json::<Value>().await.map_err(|err| ScrapeflowError::Fetch(format!("invalid json from {}: {}", url, err)))?;
        if let Some(errors) = value.get("errors").filter(|e| !e.is_null()) {
            return Err(ScrapeflowError::Fetch(format!("graphql errors from {}: {}", url, errors)));
        }
        Ok(value)
    }

    async fn fetch_page(
        &self,
        url: &str,
    ) -> Result<String> {
        debug!("fetch_page({})", url);
        let res = self.send(self.client.get(url), url).await?;
        res.text().await.map_err(|err| ScrapeflowError::Fetch(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;

    #[tokio::test]
    async fn test_fetch_json_and_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/jobs")).respond_with(ResponseTemplate::new(200).set_body_json(json!({"jobs": [1, 2]}))).mount(&server).await;
        Mock::given(method("GET")).and(path("/page")).respond_with(ResponseTemplate::new(200).set_body_string("<p>hi</p>")).mount(&server).await;

        let fetcher = HttpFetcher::new(&HttpConfig::default()).unwrap();
        let value = fetcher.fetch_json(&format!("{}/jobs", server.uri())).await.unwrap();
        assert_eq!(value, json!({"jobs": [1, 2]}));
        let page = fetcher.fetch_page(&format!("{}/page", server.uri())).await.unwrap();
        assert_eq!(page, "<p>hi</p>");
    }

    #[tokio::test]
    async fn test_fetch_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(503)).mount(&server).await;

        let fetcher = HttpFetcher::new(&HttpConfig::default()).unwrap();
        let err = fetcher.fetch_json(&format!("{}/down", server.uri())).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_graphql_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"errors": [{"message": "bad"}]})))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&HttpConfig::default()).unwrap();
        let err = fetcher.fetch_graphql(&format!("{}/graphql", server.uri()), "{ jobs }", &json!({})).await.unwrap_err();
        assert!(err.to_string().contains("graphql errors"));
    }
}
