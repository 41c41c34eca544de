use std::sync::Arc;

use crate::{
    Result,
    collab::{BrowserLauncher, DocumentExtractor, Fetcher, HtmlExtractor, HttpFetcher, LazyBrowser, NoBrowser},
    config::{BrowserConfig, Config, HttpConfig, StoreType},
    store::{MemConnector, PostgresConnector, Store, StoreConnector},
};

/// Collaborator handles available to the actions of one process.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<Store>,
    pub fetcher: Arc<dyn Fetcher>,
    pub browser: Arc<LazyBrowser>,
    pub extractor: Arc<dyn DocumentExtractor>,
}

impl Services {
    /// Releases per-process resources.
    pub async fn cleanup(&self) {
        self.browser.quit().await;
    }
}

/// Builds a fresh [`Services`] for the host and for every worker.
///
/// Each call acquires its own store connection and browser session; nothing
/// is shared between workers except what the connector itself shares.
#[derive(Clone)]
pub struct ServicesFactory {
    connector: Arc<dyn StoreConnector>,
    fetcher: Option<Arc<dyn Fetcher>>,
    browser: Arc<dyn BrowserLauncher>,
    extractor: Arc<dyn DocumentExtractor>,
    http: HttpConfig,
    browser_config: BrowserConfig,
}

impl ServicesFactory {
    pub fn new(connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            connector,
            fetcher: None,
            browser: Arc::new(NoBrowser),
            extractor: Arc::new(HtmlExtractor),
            http: HttpConfig::default(),
            browser_config: BrowserConfig::default(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let connector: Arc<dyn StoreConnector> = match (&config.store.store_type, &config.store.postgres) {
            (StoreType::Postgres, Some(postgres)) => Arc::new(PostgresConnector::new(postgres.clone())),
            _ => Arc::new(MemConnector::new()?),
        };
        let mut factory = Self::new(connector);
        factory.http = config.http.clone();
        factory.browser_config = config.browser.clone();
        #[cfg(feature = "chromium")]
        {
            factory.browser = Arc::new(crate::collab::ChromiumLauncher::new(&config.browser));
        }
        Ok(factory)
    }

    pub fn with_fetcher(
        mut self,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_browser(
        mut self,
        browser: Arc<dyn BrowserLauncher>,
    ) -> Self {
        self.browser = browser;
        self
    }

    pub fn with_extractor(
        mut self,
        extractor: Arc<dyn DocumentExtractor>,
    ) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_browser_config(
        mut self,
        config: BrowserConfig,
    ) -> Self {
        self.browser_config = config;
        self
    }

    pub fn create(&self) -> Result<Services> {
        let fetcher: Arc<dyn Fetcher> = match &self.fetcher {
            Some(fetcher) => fetcher.clone(),
            None => Arc::new(HttpFetcher::new(&self.http)?),
        };
        Ok(Services {
            store: self.connector.connect()?,
            fetcher,
            browser: Arc::new(LazyBrowser::new(self.browser.clone(), &self.browser_config)),
            extractor: self.extractor.clone(),
        })
    }
}
