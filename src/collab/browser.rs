use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{Result, ScrapeflowError, config::BrowserConfig, error::ActionError};

/// A live browser session.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Navigates to `url`, optionally waits for `wait_css`, and returns the page source.
    async fn load_page(
        &self,
        url: &str,
        wait_css: Option<&str>,
        timeout: Duration,
    ) -> Result<String>;

    async fn click(
        &self,
        selector: &str,
    ) -> Result<()>;

    async fn wait_for(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<()>;

    async fn page_source(&self) -> Result<String>;

    async fn current_url(&self) -> Result<String>;

    async fn quit(&self) -> Result<()>;
}

/// Starts browser sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BrowserDriver>>;
}

/// Launcher used when no browser backend is compiled in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBrowser;

#[async_trait]
impl BrowserLauncher for NoBrowser {
    async fn launch(&self) -> Result<Arc<dyn BrowserDriver>> {
        Err(ScrapeflowError::Browser("no browser backend available, enable the chromium feature".into()))
    }
}

/// Browser session started on first use.
///
/// Start failures are retried up to `init_retries` times; after that the
/// failure is fatal for the run.
pub struct LazyBrowser {
    launcher: Arc<dyn BrowserLauncher>,
    retries: u32,
    retry_delay: Duration,
    wait_timeout: Duration,
    driver: Mutex<Option<Arc<dyn BrowserDriver>>>,
}

impl LazyBrowser {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        config: &BrowserConfig,
    ) -> Self {
        Self {
            launcher,
            retries: config.init_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            wait_timeout: Duration::from_millis(config.wait_timeout_ms),
            driver: Mutex::new(None),
        }
    }

    /// Default wait used by nodes that do not set their own.
    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    pub async fn is_started(&self) -> bool {
        self.driver.lock().await.is_some()
    }

    pub async fn driver(&self) -> std::result::Result<Arc<dyn BrowserDriver>, ActionError> {
        let mut guard = self.driver.lock().await;
        if let Some(driver) = guard.as_ref() {
            return Ok(driver.clone());
        }

        let mut last_error = String::new();
        for attempt in 1..=self.retries {
            match self.launcher.launch().await {
                Ok(driver) => {
                    debug!("browser started after {} attempt(s)", attempt);
                    *guard = Some(driver.clone());
                    return Ok(driver);
                }
                Err(err) => {
                    warn!("browser start attempt {}/{} failed: {}", attempt, self.retries, err);
                    last_error = err.to_string();
                    if attempt < self.retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        Err(ActionError::fatal(format!("Could not start browser after {} attempts: {}", self.retries, last_error)))
    }

    /// Closes the session if one was started.
    pub async fn quit(&self) {
        let driver = self.driver.lock().await.take();
        if let Some(driver) = driver {
            if let Err(err) = driver.quit().await {
                warn!("failed to quit browser: {}", err);
            }
        }
    }
}

#[cfg(feature = "chromium")]
pub mod chromium {
    use std::{path::PathBuf, sync::Arc, time::Duration};

    use async_trait::async_trait;
    use chromiumoxide::{Browser, BrowserConfig as CdpConfig, Page};
    use futures::StreamExt;
    use tokio::{sync::Mutex, task::JoinHandle, time::Instant};

    use super::{BrowserDriver, BrowserLauncher};
    use crate::{Result, ScrapeflowError, config::BrowserConfig};

    const POLL_INTERVAL: Duration = Duration::from_millis(200);

    fn cdp_err(err: impl std::fmt::Display) -> ScrapeflowError {
        ScrapeflowError::Browser(err.to_string())
    }

    /// Launches headless Chromium through the devtools protocol.
    #[derive(Debug, Clone)]
    pub struct ChromiumLauncher {
        executable: Option<PathBuf>,
        headless: bool,
    }

    impl ChromiumLauncher {
        pub fn new(config: &BrowserConfig) -> Self {
            Self {
                executable: config.executable.as_ref().map(PathBuf::from),
                headless: config.headless,
            }
        }
    }

    #[async_trait]
    impl BrowserLauncher for ChromiumLauncher {
        async fn launch(&self) -> Result<Arc<dyn BrowserDriver>> {
            let mut builder = CdpConfig::builder().arg("--disable-gpu").arg("--no-sandbox").arg("--disable-dev-shm-usage");
            if !self.headless {
                builder = builder.with_head();
            }
            if let Some(path) = &self.executable {
                builder = builder.chrome_executable(path);
            }
            let config = builder.build().map_err(cdp_err)?;
            let (browser, mut handler) = Browser::launch(config).await.map_err(cdp_err)?;
            let events = tokio::spawn(async move { while handler.next().await.is_some() {} });
            let page = browser.new_page("about:blank").await.map_err(cdp_err)?;
            Ok(Arc::new(ChromiumDriver {
                browser: Mutex::new(browser),
                page,
                events,
            }))
        }
    }

    pub struct ChromiumDriver {
        browser: Mutex<Browser>,
        page: Page,
        events: JoinHandle<()>,
    }

    #[async_trait]
    impl BrowserDriver for ChromiumDriver {
        async fn load_page(
            &self,
            url: &str,
            wait_css: Option<&str>,
            timeout: Duration,
        ) -> Result<String> {
            tokio::time::timeout(timeout, self.page.goto(url))
                .await
                .map_err(|_| ScrapeflowError::Browser(format!("navigation to {} timed out", url)))?
                .map_err(cdp_err)?;
            if let Some(selector) = wait_css {
                self.wait_for(selector, timeout).await?;
            }
            self.page_source().await
        }

        async fn click(
            &self,
            selector: &str,
        ) -> Result<()> {
            let element = self.page.find_element(selector).await.map_err(cdp_err)?;
            element.click().await.map_err(cdp_err)?;
            Ok(())
        }

        async fn wait_for(
            &self,
            selector: &str,
            timeout: Duration,
        ) -> Result<()> {
            let deadline = Instant::now() + timeout;
            loop {
                if self.page.find_element(selector).await.is_ok() {
                    return Ok(());
                }
                if Instant::now() >= deadline {
                    return Err(ScrapeflowError::Browser(format!("timed out waiting for {}", selector)));
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        }

        async fn page_source(&self) -> Result<String> {
            self.page.content().await.map_err(cdp_err)
        }

        async fn current_url(&self) -> Result<String> {
            Ok(self.page.url().await.map_err(cdp_err)?.unwrap_or_default())
        }

        async fn quit(&self) -> Result<()> {
            let mut browser = self.browser.lock().await;
            browser.close().await.map_err(cdp_err)?;
            let _ = browser.wait().await;
            self.events.abort();
            Ok(())
        }
    }
}
