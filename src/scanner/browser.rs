use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};

use super::CrawlError;

/// One isolated browser context. `close` consumes the session, so it runs at most once.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), CrawlError>;
    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), CrawlError>;
    async fn click(&mut self, selector: &str) -> Result<(), CrawlError>;
    async fn wait_for_navigation(&mut self) -> Result<(), CrawlError>;
    async fn content(&mut self) -> Result<String, CrawlError>;
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, CrawlError>;
}

pub(crate) fn launch_chrome(
    chrome_path: Option<&Path>,
    idle_timeout: Duration,
) -> Result<Browser, String> {
    let options = LaunchOptions::default_builder()
        .headless(true)
        .path(chrome_path.map(Path::to_path_buf))
        .sandbox(false)
        .window_size(Some((1366, 900)))
        .idle_browser_timeout(idle_timeout.max(Duration::from_secs(60)))
        .args(vec![
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-setuid-sandbox"),
            OsStr::new("--disable-background-timer-throttling"),
            OsStr::new("--disable-breakpad"),
        ])
        .build()
        .map_err(|err| format!("Failed to build launch options: {err}"))?;
    Browser::new(options).map_err(|err| format!("Failed to launch browser: {err}"))
}

#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    chrome_path: Option<PathBuf>,
    step_timeout: Duration,
}

impl ChromeLauncher {
    pub fn new(chrome_path: Option<PathBuf>, step_timeout: Duration) -> Self {
        Self {
            chrome_path,
            step_timeout,
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, CrawlError> {
        let chrome_path = self.chrome_path.clone();
        let timeout = self.step_timeout;
        let (browser, tab) = tokio::task::spawn_blocking(move || -> Result<_, String> {
            let browser = launch_chrome(chrome_path.as_deref(), timeout)?;
            let tab = browser
                .new_tab()
                .map_err(|err| format!("Failed to create new tab: {err}"))?;
            tab.set_default_timeout(timeout);
            Ok((browser, tab))
        })
        .await
        .map_err(|err| CrawlError::Launch(err.to_string()))?
        .map_err(CrawlError::Launch)?;
        Ok(Box::new(ChromeSession { browser, tab }))
    }
}

struct ChromeSession {
    browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeSession {
    async fn on_tab<T, F>(&self, op: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T, String> + Send + 'static,
    {
        let tab = Arc::clone(&self.tab);
        tokio::task::spawn_blocking(move || op(&tab))
            .await
            .map_err(|err| format!("browser task failed: {err}"))?
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), CrawlError> {
        let url = url.to_string();
        self.on_tab(move |tab| {
            tab.navigate_to(&url)
                .and_then(|tab| tab.wait_until_navigated())
                .map(|_| ())
                .map_err(|err| format!("Failed to navigate to {url}: {err}"))
        })
        .await
        .map_err(CrawlError::Navigation)
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), CrawlError> {
        let selector = selector.to_string();
        let value = value.to_string();
        self.on_tab(move |tab| {
            let element = tab
                .wait_for_element(&selector)
                .map_err(|err| format!("field {selector} not found: {err}"))?;
            element
                .click()
                .and_then(|element| element.type_into(&value))
                .map(|_| ())
                .map_err(|err| format!("could not fill {selector}: {err}"))
        })
        .await
        .map_err(CrawlError::Login)
    }

    async fn click(&mut self, selector: &str) -> Result<(), CrawlError> {
        let selector = selector.to_string();
        self.on_tab(move |tab| {
            tab.wait_for_element(&selector)
                .and_then(|element| element.click().map(|_| ()))
                .map_err(|err| format!("could not click {selector}: {err}"))
        })
        .await
        .map_err(CrawlError::Login)
    }

    async fn wait_for_navigation(&mut self) -> Result<(), CrawlError> {
        self.on_tab(|tab| {
            tab.wait_until_navigated()
                .map(|_| ())
                .map_err(|err| format!("navigation did not settle: {err}"))
        })
        .await
        .map_err(CrawlError::Navigation)
    }

    async fn content(&mut self) -> Result<String, CrawlError> {
        self.on_tab(|tab| {
            tab.get_content()
                .map_err(|err| format!("Failed to get page content: {err}"))
        })
        .await
        .map_err(CrawlError::Extraction)
    }

    async fn close(self: Box<Self>) {
        let ChromeSession { browser, tab } = *self;
        let _ = tokio::task::spawn_blocking(move || {
            let _ = tab.close(true);
            drop(browser);
        })
        .await;
    }
}
