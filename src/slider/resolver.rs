//! Turns a search term into a download link by driving a browser page.

use std::time::Duration;

use tracing::{debug, instrument};
use url::Url;

use crate::slider::browser::{Session, SessionError, SessionResult};
use crate::slider::config_loader::AppConfig;

/// Outcome of a link lookup. `NotFound` is an expected result, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(String),
    NotFound,
}

/// Site-specific knowledge needed to find a download link.
#[derive(Debug, Clone)]
pub struct Resolver {
    base_url: String,
    link_selector: String,
    link_attribute: String,
    page_load_timeout: Duration,
    selector_timeout: Duration,
}

impl Resolver {
    pub fn new(base_url: impl Into<String>, link_selector: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            link_selector: link_selector.into(),
            link_attribute: "href".to_string(),
            page_load_timeout: Duration::from_secs(30),
            selector_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.site.base_url, &config.site.link_selector)
            .with_link_attribute(&config.site.link_attribute)
            .with_timeouts(config.page_load_timeout(), config.selector_timeout())
    }

    pub fn with_link_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.link_attribute = attribute.into();
        self
    }

    pub fn with_timeouts(mut self, page_load: Duration, selector: Duration) -> Self {
        self.page_load_timeout = page_load;
        self.selector_timeout = selector;
        self
    }

    /// The search page for `term`: `<base>/#<percent-encoded term>`.
    pub fn search_url(&self, term: &str) -> String {
        format!("{}/#{}", self.base_url, urlencoding::encode(term))
    }

    /// Joins a link from the page against the base URL. Absolute links are
    /// returned as they are.
    pub fn absolute_link(&self, link: &str) -> String {
        Url::parse(&self.base_url)
            .and_then(|base| base.join(link))
            .map(String::from)
            .unwrap_or_else(|_| format!("{}{}", self.base_url, link))
    }

    /// Opens the search page for `term` and waits for it to load.
    #[instrument(skip(self, session))]
    pub async fn open_search(&self, session: &dyn Session, term: &str) -> SessionResult<()> {
        let url = self.search_url(term);
        debug!("Navigating to {}", url);
        tokio::time::timeout(self.page_load_timeout, session.navigate(&url))
            .await
            .map_err(|_| SessionError::Navigation {
                url: url.clone(),
                reason: format!("page did not load within {:?}", self.page_load_timeout),
            })?
    }

    /// Waits for the download link on the current page. A selector timeout
    /// or a link without the attribute gives [Resolution::NotFound]; any
    /// other session fault is returned as an error.
    pub async fn find_link(&self, session: &dyn Session) -> SessionResult<Resolution> {
        let element = match session
            .wait_for_element(&self.link_selector, self.selector_timeout)
            .await
        {
            Ok(element) => element,
            Err(SessionError::Timeout(waited)) => {
                debug!("No {} after {:?}", self.link_selector, waited);
                return Ok(Resolution::NotFound);
            }
            Err(e) => return Err(e),
        };

        match element.attribute(&self.link_attribute).await? {
            Some(link) if !link.trim().is_empty() => Ok(Resolution::Found(self.absolute_link(&link))),
            _ => Ok(Resolution::NotFound),
        }
    }
}
