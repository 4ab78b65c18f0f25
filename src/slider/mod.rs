//! Slider downloader
//! Resolves search terms to download links through a shared browser and
//! fetches them with a bounded number of tasks in flight

pub mod browser;
pub mod config_loader;
pub mod fetcher;
pub mod ledger;
pub mod logger;
pub mod orchestration;
pub mod playlist;
pub mod progress;
pub mod resolver;
pub mod sanitize;
pub mod tui;

#[cfg(test)]
mod testing;

// Re-export the types the program wires together
pub use config_loader::{AppConfig, ConfigManager};
pub use fetcher::{HttpFetcher, HttpFetcherConfig};
pub use ledger::LedgerSummary;
pub use logger::init_logger;
pub use orchestration::{Orchestrator, OrchestratorConfig, RunReport, ShutdownHandle};
pub use playlist::{load_playlist, PLAYLIST_EXAMPLE};
pub use progress::MultiBarReporter;
pub use resolver::Resolver;
