//! Chromium sessions over the DevTools protocol.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{Element, Session, SessionError, SessionProvider, SessionResult};
use crate::slider::config_loader;

/// Delay between two selector lookups while waiting for an element.
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound on opening a page. The browser lock is held meanwhile.
const PAGE_OPEN_TIMEOUT: Duration = Duration::from_secs(30);

/// A launched Chromium shared by every task slot.
pub struct ChromiumBrowser {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
}

impl ChromiumBrowser {
    /// Launches the browser. Failure here aborts the whole run.
    pub async fn launch(settings: &config_loader::Browser) -> SessionResult<Self> {
        info!("Launching browser (headless={})", settings.headless);

        let mut builder = BrowserConfig::builder();
        if let Some(ref executable) = settings.chrome_executable {
            builder = builder.chrome_executable(PathBuf::from(executable));
        }
        if !settings.headless {
            builder = builder.with_head();
        }
        builder = builder
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--mute-audio");
        for arg in &settings.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder.build().map_err(SessionError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler stopped: {}", e);
                    break;
                }
            }
        });

        Ok(Self {
            browser: Mutex::new(browser),
            handler,
        })
    }

    /// Closes the browser process and stops the event handler.
    pub async fn close(&self) {
        let mut browser = self.browser.lock().await;
        if let Err(e) = browser.close().await {
            warn!("Failed to close browser: {}", e);
        }
        if let Err(e) = browser.wait().await {
            warn!("Failed to wait for browser exit: {}", e);
        }
        self.handler.abort();
        info!("Browser closed");
    }
}

#[async_trait]
impl SessionProvider for ChromiumBrowser {
    async fn new_session(&self) -> SessionResult<Box<dyn Session>> {
        let open = async {
            self.browser
                .lock()
                .await
                .new_page("about:blank")
                .await
                .map_err(|e| SessionError::NewPage(e.to_string()))
        };
        let page = tokio::time::timeout(PAGE_OPEN_TIMEOUT, open)
            .await
            .map_err(|_| SessionError::NewPage(format!("no page after {:?}", PAGE_OPEN_TIMEOUT)))??;
        Ok(Box::new(ChromiumSession { page }))
    }
}

struct ChromiumSession {
    page: Page,
}

#[async_trait]
impl Session for ChromiumSession {
    async fn navigate(&self, url: &str) -> SessionResult<()> {
        // goto resolves once the load event fired
        self.page
            .goto(url)
            .await
            .map_err(|e| SessionError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn wait_for_element(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> SessionResult<Box<dyn Element>> {
        let poll = async {
            loop {
                match self.page.find_element(selector).await {
                    Ok(element) => return Ok(element),
                    Err(e) if is_missing_node(&e.to_string()) => {
                        trace!("Selector {} not present yet: {}", selector, e)
                    }
                    Err(e) => return Err(SessionError::Query(e.to_string())),
                }
                tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
            }
        };

        let element = tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| SessionError::Timeout(timeout))??;
        Ok(Box::new(ChromiumElement { element }))
    }

    async fn close(&self) -> SessionResult<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| SessionError::Close(e.to_string()))
    }
}

struct ChromiumElement {
    element: chromiumoxide::element::Element,
}

#[async_trait]
impl Element for ChromiumElement {
    async fn attribute(&self, name: &str) -> SessionResult<Option<String>> {
        self.element
            .attribute(name)
            .await
            .map_err(|e| SessionError::Query(e.to_string()))
    }
}

/// Whether a `find_element` error only means nothing matches yet. Anything
/// else (closed target, crashed page) is a real fault.
fn is_missing_node(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("could not find node") || message.contains("not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_node_keeps_polling() {
        assert!(is_missing_node("Error -32000: Could not find node with given id"));
        assert!(is_missing_node("Not found"));
    }

    #[test]
    fn test_dead_page_is_a_fault() {
        assert!(!is_missing_node("Error -32000: No target with given id found"));
        assert!(!is_missing_node("Error -32000: Target closed"));
        assert!(!is_missing_node("channel closed"));
    }
}
