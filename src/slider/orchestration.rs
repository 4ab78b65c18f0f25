//! Orchestration layer for the downloader
//!
//! This module runs a whole playlist:
//! 1. Starts at most `max_concurrent_tasks` task slots at a time (semaphore gated)
//! 2. Drives each slot through navigate, resolve, fetch and close on its own page
//! 3. Tracks each task with a unique trace ID using tracing
//! 4. Turns every failure into exactly one ledger entry without stopping the run

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::slider::browser::{Session, SessionProvider};
use crate::slider::config_loader::AppConfig;
use crate::slider::fetcher::Fetcher;
use crate::slider::ledger::{ErrorLedger, ErrorRecord, FailureCause, LedgerSummary};
use crate::slider::playlist::DownloadRequest;
use crate::slider::progress::{DeferredRemovals, Indicator, ProgressReporter};
use crate::slider::resolver::{Resolution, Resolver};
use crate::slider::sanitize::sanitize_filename;

/// Number of checkpoints on every task indicator.
pub const TASK_CHECKPOINTS: u64 = 4;

/// Error types for the orchestration layer
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

/// Result type for orchestration operations
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Where a task is in its pipeline. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Created,
    Navigated,
    Resolved,
    Fetched,
    Closed,
}

impl Stage {
    pub fn checkpoint(self) -> u64 {
        match self {
            Stage::Created => 0,
            Stage::Navigated => 1,
            Stage::Resolved => 2,
            Stage::Fetched => 3,
            Stage::Closed => 4,
        }
    }
}

/// State of one in-flight request.
pub struct TaskHandle {
    index: usize,
    trace_id: Uuid,
    stage: Stage,
    indicator: Box<dyn Indicator>,
}

impl TaskHandle {
    fn new(index: usize, filename: &str, reporter: &dyn ProgressReporter) -> Self {
        let indicator = reporter.create(TASK_CHECKPOINTS, 0, format!("({}) {}", index, filename));
        Self {
            index,
            trace_id: Uuid::new_v4(),
            stage: Stage::Created,
            indicator,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Moves to `stage` and updates the indicator. Backward moves are ignored.
    pub fn advance(&mut self, stage: Stage) {
        if stage <= self.stage {
            return;
        }
        self.stage = stage;
        self.indicator.advance(stage.checkpoint());
    }

    fn into_indicator(self) -> Box<dyn Indicator> {
        self.indicator.finish();
        self.indicator
    }
}

/// How a single task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Fetched,
    Failed,
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_tasks: usize,
    pub download_dir: PathBuf,
    pub removal_delay: Duration,
}

impl OrchestratorConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_concurrent_tasks: config.pools.max_concurrent_tasks,
            download_dir: PathBuf::from(&config.paths.download_directory),
            removal_delay: config.removal_delay(),
        }
    }
}

/// Result of a run: which requests produced a file and every failure.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub total: usize,
    /// Indices of the requests that were fetched, ascending.
    pub fetched: Vec<usize>,
    ledger: ErrorLedger,
}

impl RunReport {
    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.ledger.snapshot()
    }

    pub fn summary(&self) -> LedgerSummary {
        self.ledger.summary()
    }

    /// Fetches plus ledger entries. Equals `total` after every run.
    pub fn outcome_count(&self) -> usize {
        self.fetched.len() + self.ledger.len()
    }
}

/// Stops a run from starting new tasks. Tasks already running finish.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared by every task slot of a run.
struct TaskContext {
    sessions: Arc<dyn SessionProvider>,
    fetcher: Arc<dyn Fetcher>,
    resolver: Resolver,
    download_dir: PathBuf,
    ledger: ErrorLedger,
    removals: DeferredRemovals,
}

/// Runs a playlist over a shared browser with bounded concurrency.
pub struct Orchestrator {
    config: OrchestratorConfig,
    sessions: Arc<dyn SessionProvider>,
    fetcher: Arc<dyn Fetcher>,
    resolver: Resolver,
    reporter: Arc<dyn ProgressReporter>,
    shutdown: ShutdownHandle,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        sessions: Arc<dyn SessionProvider>,
        fetcher: Arc<dyn Fetcher>,
        resolver: Resolver,
        reporter: Arc<dyn ProgressReporter>,
    ) -> Self {
        Self {
            config,
            sessions,
            fetcher,
            resolver,
            reporter,
            shutdown: ShutdownHandle::new(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Creates the download directory. Failure here aborts the run.
    pub fn prepare(&self) -> OrchestratorResult<()> {
        let dir = &self.config.download_dir;
        if dir.exists() && !dir.is_dir() {
            return Err(OrchestratorError::Config(format!(
                "{} exists and is not a directory",
                dir.display()
            )));
        }
        if !dir.exists() {
            info!("Creating download directory: {}", dir.display());
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Runs every request to a terminal outcome. Returns once every task
    /// has closed its page and every indicator has been removed.
    pub async fn run(&self, requests: Vec<DownloadRequest>) -> RunReport {
        let total = requests.len();
        if self.config.max_concurrent_tasks == 0 {
            warn!("max_concurrent_tasks is 0, running one task at a time");
        }
        let limit = self.config.max_concurrent_tasks.max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut shutdown_rx = self.shutdown.subscribe();

        let context = Arc::new(TaskContext {
            sessions: self.sessions.clone(),
            fetcher: self.fetcher.clone(),
            resolver: self.resolver.clone(),
            download_dir: self.config.download_dir.clone(),
            ledger: ErrorLedger::new(),
            removals: DeferredRemovals::new(self.config.removal_delay),
        });

        let mut slots: JoinSet<(usize, TaskOutcome)> = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, (usize, String)> = HashMap::new();

        info!("Starting {} tasks with at most {} in flight", total, limit);

        let mut pending = requests.into_iter().enumerate();
        while let Some((index, request)) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown_rx) => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                warn!("Run cancelled, skipping the remaining {} tasks", total - index);
                for (index, request) in std::iter::once((index, request)).chain(pending.by_ref()) {
                    context
                        .ledger
                        .record(ErrorRecord::new(index, request.filename, FailureCause::Cancelled));
                }
                break;
            };

            let handle = TaskHandle::new(index, &request.filename, self.reporter.as_ref());
            let span = tracing::info_span!("task", index, trace_id = %handle.trace_id);
            let filename = request.filename.clone();
            let context = context.clone();

            let abort = slots.spawn(
                async move {
                    let outcome = context.run_task(handle, request).await;
                    drop(permit);
                    (index, outcome)
                }
                .instrument(span),
            );
            in_flight.insert(abort.id(), (index, filename));
        }

        let mut fetched = Vec::new();
        while let Some(joined) = slots.join_next_with_id().await {
            match joined {
                Ok((id, (index, outcome))) => {
                    in_flight.remove(&id);
                    if outcome == TaskOutcome::Fetched {
                        fetched.push(index);
                    }
                }
                Err(e) => {
                    error!("Task slot failed: {}", e);
                    if let Some((index, filename)) = in_flight.remove(&e.id()) {
                        context.ledger.record(ErrorRecord::new(
                            index,
                            filename,
                            FailureCause::Session(format!("task slot failed: {}", e)),
                        ));
                    }
                }
            }
        }

        context.removals.flush().await;
        self.reporter.finish();

        fetched.sort_unstable();
        if context.ledger.is_empty() {
            info!("Run finished: all {} tasks fetched", total);
        } else {
            info!(
                "Run finished: {} fetched, {} failed, {} total",
                fetched.len(),
                context.ledger.len(),
                total
            );
        }

        let report = RunReport {
            total,
            fetched,
            ledger: context.ledger.clone(),
        };
        if report.outcome_count() != total {
            error!(
                "{} outcomes recorded for {} tasks",
                report.outcome_count(),
                total
            );
        }
        report
    }
}

impl TaskContext {
    /// One task slot: open a page, resolve, fetch, close, report.
    async fn run_task(&self, mut handle: TaskHandle, request: DownloadRequest) -> TaskOutcome {
        debug!("Task started for {}", request.filename);

        let failure = match self.sessions.new_session().await {
            Ok(session) => {
                let work = AssertUnwindSafe(self.drive(session.as_ref(), &request, &mut handle));
                let failure = match work.catch_unwind().await {
                    Ok(Ok(())) => None,
                    Ok(Err(cause)) => Some(cause),
                    Err(panic) => {
                        let message = panic_message(&*panic);
                        error!("Task panicked: {}", message);
                        Some(FailureCause::Session(format!("task panicked: {}", message)))
                    }
                };

                if let Err(e) = session.close().await {
                    warn!("Failed to close page: {}", e);
                }
                failure
            }
            Err(e) => {
                error!("Could not open a page: {}", e);
                Some(FailureCause::Session(e.to_string()))
            }
        };

        handle.advance(Stage::Closed);
        debug!("Task reached {:?}", handle.stage());

        let outcome = match failure {
            None => {
                info!("Fetched {}", request.filename);
                TaskOutcome::Fetched
            }
            Some(cause) => {
                let record = ErrorRecord::new(handle.index(), request.filename, cause);
                warn!("{}", record);
                self.ledger.record(record);
                TaskOutcome::Failed
            }
        };

        self.removals.schedule(handle.into_indicator()).await;
        outcome
    }

    async fn drive(
        &self,
        session: &dyn Session,
        request: &DownloadRequest,
        handle: &mut TaskHandle,
    ) -> Result<(), FailureCause> {
        self.resolver
            .open_search(session, &request.search_term)
            .await
            .map_err(|e| FailureCause::Session(e.to_string()))?;
        handle.advance(Stage::Navigated);

        let resolution = self
            .resolver
            .find_link(session)
            .await
            .map_err(|e| FailureCause::Session(e.to_string()))?;
        handle.advance(Stage::Resolved);

        let result = match resolution {
            Resolution::Found(url) => self.fetch(&url, request).await,
            Resolution::NotFound => {
                debug!("No download link for {:?}", request.search_term);
                Err(FailureCause::NotFound)
            }
        };
        handle.advance(Stage::Fetched);
        result
    }

    /// Fetches into the download directory. Returned errors and errors
    /// reported through the callback collapse into one failure.
    async fn fetch(&self, url: &str, request: &DownloadRequest) -> Result<(), FailureCause> {
        let dest = self.download_dir.join(sanitize_filename(&request.filename));
        debug!("Fetching {} to {}", url, dest.display());

        let reported = Mutex::new(Vec::new());
        let on_error = |message: String| {
            warn!("Fetch reported: {}", message);
            reported.lock().push(message);
        };

        let result = self
            .fetcher
            .fetch(url, &dest, &request.attributes, &on_error)
            .await;

        let mut messages = reported.into_inner();
        if let Err(e) = result {
            messages.insert(0, e.to_string());
        }

        if messages.is_empty() {
            Ok(())
        } else {
            Err(FailureCause::Fetch(messages.join("; ")))
        }
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|triggered| *triggered).await.is_err() {
        // Sender gone: shutdown can no longer be requested
        std::future::pending::<()>().await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
