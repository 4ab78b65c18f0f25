//! Append-only record of every failed download in a run.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Why a request did not produce a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The search page never showed a usable download link.
    NotFound,
    /// The download itself failed.
    Fetch(String),
    /// The browser session failed while navigating or querying the page.
    Session(String),
    /// The run was cancelled before this request was started.
    Cancelled,
}

/// One failure, tied back to the request that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub index: usize,
    pub filename: String,
    pub cause: FailureCause,
}

impl ErrorRecord {
    pub fn new(index: usize, filename: impl Into<String>, cause: FailureCause) -> Self {
        Self {
            index,
            filename: filename.into(),
            cause,
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            FailureCause::NotFound => write!(f, "Error downloading {}", self.filename),
            FailureCause::Fetch(reason) | FailureCause::Session(reason) => {
                write!(f, "Error downloading {}: {}", self.filename, reason)
            }
            FailureCause::Cancelled => write!(f, "Skipped {}: run was cancelled", self.filename),
        }
    }
}

/// Shared, clonable ledger. Clones append to the same list.
#[derive(Debug, Clone, Default)]
pub struct ErrorLedger {
    entries: Arc<Mutex<Vec<ErrorRecord>>>,
}

impl ErrorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: ErrorRecord) {
        self.entries.lock().push(record);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of the entries in insertion order.
    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        self.entries.lock().clone()
    }

    pub fn summary(&self) -> LedgerSummary {
        let entries = self.entries.lock();
        LedgerSummary {
            count: entries.len(),
            messages: entries.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Count plus rendered messages, ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSummary {
    pub count: usize,
    pub messages: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let record = ErrorRecord::new(1, "B", FailureCause::NotFound);
        assert_eq!(record.to_string(), "Error downloading B");
    }

    #[test]
    fn test_fetch_message_includes_reason() {
        let record = ErrorRecord::new(0, "A.mp3", FailureCause::Fetch("HTTP 404".to_string()));
        assert_eq!(record.to_string(), "Error downloading A.mp3: HTTP 404");
    }

    #[test]
    fn test_clones_share_entries() {
        let ledger = ErrorLedger::new();
        let clone = ledger.clone();
        assert!(ledger.is_empty());
        clone.record(ErrorRecord::new(0, "A", FailureCause::NotFound));

        assert!(!ledger.is_empty());
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.summary().messages, vec!["Error downloading A".to_string()]);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let ledger = ErrorLedger::new();
        let handles: Vec<_> = (0..8)
            .map(|thread| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        ledger.record(ErrorRecord::new(
                            thread * 1000 + i,
                            format!("{}-{}", thread, i),
                            FailureCause::NotFound,
                        ));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut indices: Vec<_> = ledger.snapshot().into_iter().map(|r| r.index).collect();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), 2000);
        assert_eq!(ledger.summary().count, 2000);
    }
}
