use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use headless_chrome::types::PrintToPdfOptions;

use super::{ChannelError, PdfRenderer};
use crate::scanner::browser::launch_chrome;

/// Prints HTML documents to PDF with a short-lived headless Chrome.
#[derive(Debug, Clone)]
pub struct ChromePdfRenderer {
    chrome_path: Option<PathBuf>,
    timeout: Duration,
}

impl ChromePdfRenderer {
    pub fn new(chrome_path: Option<PathBuf>, timeout: Duration) -> Self {
        Self {
            chrome_path,
            timeout,
        }
    }
}

#[async_trait]
impl PdfRenderer for ChromePdfRenderer {
    async fn render(&self, html: &str) -> Result<Vec<u8>, ChannelError> {
        let data_url = format!("data:text/html;base64,{}", STANDARD.encode(html));
        let chrome_path = self.chrome_path.clone();
        let timeout = self.timeout;

        // headless_chrome is blocking; keep it off the runtime threads.
        let task = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, String> {
            let browser = launch_chrome(chrome_path.as_deref(), timeout)?;
            let tab = browser
                .new_tab()
                .map_err(|err| format!("Failed to create new tab: {err}"))?;
            tab.set_default_timeout(timeout);
            tab.navigate_to(&data_url)
                .and_then(|tab| tab.wait_until_navigated())
                .map_err(|err| format!("Failed to load document: {err}"))?;
            let pdf = tab
                .print_to_pdf(Some(PrintToPdfOptions {
                    print_background: Some(true),
                    prefer_css_page_size: Some(true),
                    ..Default::default()
                }))
                .map_err(|err| format!("Failed to print PDF: {err}"));
            let _ = tab.close(true);
            pdf
        });

        match tokio::time::timeout(timeout * 2, task).await {
            Ok(Ok(Ok(bytes))) => Ok(bytes),
            Ok(Ok(Err(message))) => Err(ChannelError::Render(message)),
            Ok(Err(join_err)) => Err(ChannelError::Render(format!(
                "pdf task panicked: {join_err}"
            ))),
            Err(_) => Err(ChannelError::Render(format!(
                "pdf rendering timed out after {}s",
                (timeout * 2).as_secs()
            ))),
        }
    }
}
