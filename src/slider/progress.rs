//! Per-task progress indicators
//!
//! The orchestrator only talks to the [ProgressReporter] and [Indicator]
//! traits. [MultiBarReporter] renders them as stacked `indicatif` bars.

use std::sync::Arc;
use std::time::Duration;

use indicatif::MultiProgress;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::slider::tui::{multi_draw_target, task_style, ProgressBarBuilder};

/// One progress indicator owned by one task.
pub trait Indicator: Send + Sync {
    /// Moves the indicator to checkpoint `to`.
    fn advance(&self, to: u64);

    /// Marks the indicator complete without removing it.
    fn finish(&self);

    /// Removes the indicator from the display.
    fn remove(&self);
}

/// Factory for indicators plus the end-of-run hook.
pub trait ProgressReporter: Send + Sync {
    fn create(&self, total: u64, initial: u64, label: String) -> Box<dyn Indicator>;

    /// Called once after every task and deferred removal is done.
    fn finish(&self) {}
}

/// Stacked terminal bars, one per in-flight task.
pub struct MultiBarReporter {
    multi: MultiProgress,
}

impl MultiBarReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(multi_draw_target()),
        }
    }

    /// A reporter that never draws anything.
    #[cfg(test)]
    pub fn hidden() -> Self {
        Self {
            multi: MultiProgress::with_draw_target(indicatif::ProgressDrawTarget::hidden()),
        }
    }
}

impl Default for MultiBarReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for MultiBarReporter {
    fn create(&self, total: u64, initial: u64, label: String) -> Box<dyn Indicator> {
        let bar = ProgressBarBuilder::new(total)
            .style(task_style())
            .position(initial)
            .message(label)
            .attach(&self.multi);

        Box::new(TaskBar {
            bar,
            multi: self.multi.clone(),
        })
    }

    fn finish(&self) {
        if let Err(e) = self.multi.clear() {
            debug!("Failed to clear progress display: {}", e);
        }
    }
}

struct TaskBar {
    bar: indicatif::ProgressBar,
    multi: MultiProgress,
}

impl Indicator for TaskBar {
    fn advance(&self, to: u64) {
        self.bar.set_position(to);
    }

    fn finish(&self) {
        self.bar.finish();
    }

    fn remove(&self) {
        self.bar.finish();
        self.multi.remove(&self.bar);
    }
}

/// Removals of finished indicators, each delayed so the completed bar stays
/// visible for a moment. All pending removals are awaited by [flush].
///
/// [flush]: DeferredRemovals::flush
#[derive(Clone)]
pub struct DeferredRemovals {
    delay: Duration,
    pending: Arc<Mutex<JoinSet<()>>>,
}

impl DeferredRemovals {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Schedules `indicator` for removal after the configured delay.
    pub async fn schedule(&self, indicator: Box<dyn Indicator>) {
        let delay = self.delay;
        self.pending.lock().await.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            indicator.remove();
        });
    }

    #[cfg(test)]
    pub async fn pending(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Waits for every scheduled removal to run.
    pub async fn flush(&self) {
        let mut pending = self.pending.lock().await;
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                warn!("Deferred indicator removal failed: {}", e);
            }
        }
    }
}
