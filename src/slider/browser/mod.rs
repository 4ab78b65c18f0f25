//! Browser automation seam
//!
//! The orchestrator drives pages through [SessionProvider], [Session] and
//! [Element]. The Chromium implementation lives in [chromium] and is only
//! compiled with the `browser` feature.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[cfg(feature = "browser")]
pub mod chromium;

#[cfg(feature = "browser")]
pub use chromium::ChromiumBrowser;

/// Error types for browser sessions
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Could not open a new page: {0}")]
    NewPage(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Page query failed: {0}")]
    Query(String),

    #[error("Closing the page failed: {0}")]
    Close(String),

    #[error("Browser support not compiled. Rebuild with: cargo build --features browser")]
    Unsupported,
}

/// Result type for browser sessions
pub type SessionResult<T> = Result<T, SessionError>;

/// Hands out fresh sessions. Must be callable from several tasks at once.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn new_session(&self) -> SessionResult<Box<dyn Session>>;
}

/// One browser page, owned by a single task.
#[async_trait]
pub trait Session: Send + Sync {
    /// Navigates to `url` and waits for the load event.
    async fn navigate(&self, url: &str) -> SessionResult<()>;

    /// Waits up to `timeout` for `selector` to match. Gives
    /// [SessionError::Timeout] when nothing matched in time.
    async fn wait_for_element(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> SessionResult<Box<dyn Element>>;

    async fn close(&self) -> SessionResult<()>;
}

/// A matched DOM element.
#[async_trait]
pub trait Element: Send + Sync {
    async fn attribute(&self, name: &str) -> SessionResult<Option<String>>;
}
