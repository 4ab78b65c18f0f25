//! Stub collaborators shared by the unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::slider::browser::{Element, Session, SessionError, SessionProvider, SessionResult};
use crate::slider::fetcher::{DownloadError, DownloadResult, ErrorCallback, Fetcher};
use crate::slider::playlist::Attributes;
use crate::slider::progress::{Indicator, ProgressReporter};

/// What the search page shows for a term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkBehaviour {
    Link(String),
    /// Links to `/dl/<term>.mp3`.
    Echo,
    NoAttribute,
    /// The selector never matches.
    Never,
    /// The element query itself fails.
    Fault,
    /// Navigation fails.
    BrokenPage,
}

/// Counters shared by every session of a [StubProvider].
#[derive(Debug, Default)]
pub struct SessionStats {
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

impl SessionStats {
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

pub struct StubSession {
    behaviours: Arc<HashMap<String, LinkBehaviour>>,
    default: LinkBehaviour,
    current_term: Mutex<Option<String>>,
    navigation_delay: Duration,
    stats: Option<Arc<SessionStats>>,
}

impl StubSession {
    /// A session that shows `behaviour` for every term.
    pub fn new(behaviour: LinkBehaviour) -> Self {
        Self {
            behaviours: Arc::new(HashMap::new()),
            default: behaviour,
            current_term: Mutex::new(None),
            navigation_delay: Duration::ZERO,
            stats: None,
        }
    }

    pub fn with_navigation_delay(mut self, delay: Duration) -> Self {
        self.navigation_delay = delay;
        self
    }

    fn behaviour(&self) -> LinkBehaviour {
        self.current_term
            .lock()
            .as_ref()
            .and_then(|term| self.behaviours.get(term).cloned())
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl Session for StubSession {
    async fn navigate(&self, url: &str) -> SessionResult<()> {
        if !self.navigation_delay.is_zero() {
            tokio::time::sleep(self.navigation_delay).await;
        }
        let term = url
            .split_once('#')
            .and_then(|(_, fragment)| urlencoding::decode(fragment).ok())
            .map(|term| term.into_owned());
        *self.current_term.lock() = term;

        if self.behaviour() == LinkBehaviour::BrokenPage {
            return Err(SessionError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_RESET".to_string(),
            });
        }
        Ok(())
    }

    async fn wait_for_element(
        &self,
        _selector: &str,
        timeout: Duration,
    ) -> SessionResult<Box<dyn Element>> {
        match self.behaviour() {
            LinkBehaviour::Link(link) => Ok(Box::new(StubElement { href: Some(link) })),
            LinkBehaviour::Echo => {
                let term = self.current_term.lock().clone().unwrap_or_default();
                Ok(Box::new(StubElement {
                    href: Some(format!("/dl/{}.mp3", term)),
                }))
            }
            LinkBehaviour::NoAttribute => Ok(Box::new(StubElement { href: None })),
            LinkBehaviour::Never => {
                tokio::time::sleep(timeout.min(Duration::from_millis(20))).await;
                Err(SessionError::Timeout(timeout))
            }
            LinkBehaviour::Fault => Err(SessionError::Query("node detached".to_string())),
            LinkBehaviour::BrokenPage => Err(SessionError::Query("no document".to_string())),
        }
    }

    async fn close(&self) -> SessionResult<()> {
        if let Some(ref stats) = self.stats {
            stats.active.fetch_sub(1, Ordering::SeqCst);
            stats.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct StubElement {
    href: Option<String>,
}

#[async_trait]
impl Element for StubElement {
    async fn attribute(&self, _name: &str) -> SessionResult<Option<String>> {
        Ok(self.href.clone())
    }
}

/// Session provider keyed by search term.
pub struct StubProvider {
    behaviours: Arc<HashMap<String, LinkBehaviour>>,
    default: LinkBehaviour,
    navigation_delay: Duration,
    refuse_sessions: bool,
    pub stats: Arc<SessionStats>,
}

impl StubProvider {
    pub fn new(default: LinkBehaviour) -> Self {
        Self {
            behaviours: Arc::new(HashMap::new()),
            default,
            navigation_delay: Duration::ZERO,
            refuse_sessions: false,
            stats: Arc::new(SessionStats::default()),
        }
    }

    /// Every term links to `/dl/<term>.mp3`.
    pub fn linking_all() -> Self {
        Self::new(LinkBehaviour::Echo)
    }

    pub fn with_term(mut self, term: &str, behaviour: LinkBehaviour) -> Self {
        Arc::make_mut(&mut self.behaviours).insert(term.to_string(), behaviour);
        self
    }

    pub fn with_navigation_delay(mut self, delay: Duration) -> Self {
        self.navigation_delay = delay;
        self
    }

    pub fn refusing_sessions(mut self) -> Self {
        self.refuse_sessions = true;
        self
    }
}

#[async_trait]
impl SessionProvider for StubProvider {
    async fn new_session(&self) -> SessionResult<Box<dyn Session>> {
        if self.refuse_sessions {
            return Err(SessionError::NewPage("target crashed".to_string()));
        }

        let active = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active.fetch_max(active, Ordering::SeqCst);
        self.stats.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(StubSession {
            behaviours: self.behaviours.clone(),
            default: self.default.clone(),
            current_term: Mutex::new(None),
            navigation_delay: self.navigation_delay,
            stats: Some(self.stats.clone()),
        }))
    }
}

/// What the stub fetcher does for a URL.
#[derive(Debug, Clone)]
pub enum FetchBehaviour {
    Succeed,
    Fail(String),
    /// Succeeds but reports a problem through the callback.
    SoftError(String),
    Panic,
}

#[derive(Default)]
pub struct StubFetcher {
    behaviours: HashMap<String, FetchBehaviour>,
    delay: Duration,
    fetched: Mutex<Vec<(String, PathBuf)>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: &str, behaviour: FetchBehaviour) -> Self {
        self.behaviours.insert(url.to_string(), behaviour);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every attempted fetch as `(url, destination)`.
    pub fn fetched(&self) -> Vec<(String, PathBuf)> {
        self.fetched.lock().clone()
    }
}

#[async_trait]
impl Fetcher for StubFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        _attributes: &Attributes,
        on_error: ErrorCallback<'_>,
    ) -> DownloadResult<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.fetched.lock().push((url.to_string(), dest.to_path_buf()));

        match self.behaviours.get(url).cloned().unwrap_or(FetchBehaviour::Succeed) {
            FetchBehaviour::Succeed => Ok(()),
            FetchBehaviour::Fail(reason) => Err(DownloadError::Download(reason)),
            FetchBehaviour::SoftError(reason) => {
                on_error(reason);
                Ok(())
            }
            FetchBehaviour::Panic => panic!("fetcher blew up on {}", url),
        }
    }
}

/// Everything that happened to one indicator.
#[derive(Debug, Clone, Default)]
pub struct IndicatorLog {
    pub label: String,
    pub total: u64,
    pub positions: Vec<u64>,
    pub finished: bool,
    pub removed: bool,
}

#[derive(Clone, Default)]
pub struct RecordingReporter {
    logs: Arc<Mutex<Vec<IndicatorLog>>>,
}

impl RecordingReporter {
    pub fn logs(&self) -> Vec<IndicatorLog> {
        self.logs.lock().clone()
    }

    pub fn removed(&self) -> usize {
        self.logs.lock().iter().filter(|log| log.removed).count()
    }
}

impl ProgressReporter for RecordingReporter {
    fn create(&self, total: u64, initial: u64, label: String) -> Box<dyn Indicator> {
        let mut logs = self.logs.lock();
        logs.push(IndicatorLog {
            label,
            total,
            positions: vec![initial],
            ..IndicatorLog::default()
        });
        Box::new(RecordingIndicator {
            slot: logs.len() - 1,
            logs: self.logs.clone(),
        })
    }
}

struct RecordingIndicator {
    slot: usize,
    logs: Arc<Mutex<Vec<IndicatorLog>>>,
}

impl Indicator for RecordingIndicator {
    fn advance(&self, to: u64) {
        self.logs.lock()[self.slot].positions.push(to);
    }

    fn finish(&self) {
        self.logs.lock()[self.slot].finished = true;
    }

    fn remove(&self) {
        self.logs.lock()[self.slot].removed = true;
    }
}

/// Serves a single HTTP response on a local port and returns its URL.
pub async fn serve_once(status: &'static str, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        if let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            );
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(&body).await;
            let _ = stream.shutdown().await;
        }
    });

    format!("http://127.0.0.1:{}/file.mp3", port)
}
