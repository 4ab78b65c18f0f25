use std::env::current_dir;
use std::fs::write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use clap::Parser;
use console::{style, Term};
use tracing::{debug, info, trace, warn};

use crate::log_system_information;
use crate::slider::{
    init_logger, load_playlist, AppConfig, ConfigManager, LedgerSummary, RunReport,
    ShutdownHandle, PLAYLIST_EXAMPLE,
};

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

/// Downloads every track of a playlist from slider.kz.
#[derive(Parser, Debug, Clone)]
#[command(name = "slider_downloader", version, about)]
pub(crate) struct Args {
    /// Playlist file (TOML or JSON). Defaults to `paths.playlist_file`
    #[arg(short, long)]
    pub playlist: Option<PathBuf>,

    /// Directory holding config.toml
    #[arg(short, long, default_value = ".")]
    pub config_dir: PathBuf,

    /// Download directory. Overrides `paths.download_directory`
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of tasks in flight. Overrides `pools.max_concurrent_tasks`
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,
}

/// A program class that handles the flow of the downloader user experience and steps of execution.
pub(crate) struct Program {
    args: Args,
}

impl Program {
    /// Creates a new instance of the program.
    pub(crate) fn new(args: Args) -> Self {
        Self { args }
    }

    /// Runs the downloader program. Per-track failures end up in the
    /// summary; only startup faults are returned as errors.
    pub(crate) async fn run(&self) -> Result<(), Error> {
        let config = self.load_config()?;
        let _log_guard = init_logger(Path::new(&config.paths.log_directory), &config.logging)
            .context("Failed to initialize logging")?;

        Term::stdout().set_title("slider downloader");
        trace!("Starting slider downloader...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);
        log_system_information();
        match current_dir() {
            Ok(dir) => trace!("Program Working Directory: {}", dir.display()),
            Err(e) => warn!("Unable to get working directory: {}", e),
        }

        let playlist_path = self
            .args
            .playlist
            .clone()
            .unwrap_or_else(|| PathBuf::from(&config.paths.playlist_file));

        if ensure_playlist(&playlist_path)? {
            println!(
                "Created {}. Add the tracks you want and run again.",
                playlist_path.display()
            );
            return Ok(());
        }

        trace!("Parsing playlist...");
        let requests = load_playlist(&playlist_path)
            .with_context(|| format!("Failed to load {}", playlist_path.display()))?;

        let report = download(&config, requests).await?;

        info!("Fetched {} of {} tracks", report.fetched.len(), report.total);
        for record in report.errors() {
            debug!(index = record.index, "{}", record);
        }
        print_summary(&report.summary());
        Ok(())
    }

    fn load_config(&self) -> Result<AppConfig, Error> {
        let manager = ConfigManager::new(&self.args.config_dir)?;
        let mut config = manager
            .load()
            .with_context(|| format!("Failed to load {}", manager.config_path().display()))?;
        apply_overrides(&mut config, &self.args);
        config.validate()?;
        Ok(config)
    }
}

/// Writes the example playlist when `path` is missing. Returns whether it
/// was written, in which case the run stops so the user can edit it.
fn ensure_playlist(path: &Path) -> Result<bool, Error> {
    trace!("Checking if playlist exists...");
    if path.exists() {
        return Ok(false);
    }

    info!("Playlist does not exist, creating {}", path.display());
    write(path, PLAYLIST_EXAMPLE).with_context(|| format!("Failed to write {}", path.display()))?;
    trace!("Playlist \"{}\" created...", path.display());
    Ok(true)
}

/// What a Ctrl-C means at this point of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    /// Stop starting tasks and let the running ones finish.
    Graceful,
    /// Stop now.
    Force,
}

fn handle_interrupt(shutdown: &ShutdownHandle) -> Interrupt {
    if shutdown.is_triggered() {
        Interrupt::Force
    } else {
        shutdown.trigger();
        Interrupt::Graceful
    }
}

/// Command line values win over the config file.
fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(ref output) = args.output {
        config.paths.download_directory = output.to_string_lossy().into_owned();
    }
    if let Some(concurrency) = args.concurrency {
        config.pools.max_concurrent_tasks = concurrency;
    }
    if args.headed {
        config.browser.headless = false;
    }
}

#[cfg(feature = "browser")]
async fn download(
    config: &AppConfig,
    requests: Vec<crate::slider::playlist::DownloadRequest>,
) -> Result<RunReport, Error> {
    use std::sync::Arc;

    use crate::slider::browser::ChromiumBrowser;
    use crate::slider::{
        HttpFetcher, HttpFetcherConfig, MultiBarReporter, Orchestrator, OrchestratorConfig,
        Resolver,
    };

    let fetcher = HttpFetcher::new(&HttpFetcherConfig {
        timeout: config.fetch_timeout(),
        ..HttpFetcherConfig::default()
    })?;

    let browser = Arc::new(ChromiumBrowser::launch(&config.browser).await?);

    let orchestrator = Orchestrator::new(
        OrchestratorConfig::from_app_config(config),
        browser.clone(),
        Arc::new(fetcher),
        Resolver::from_config(config),
        Arc::new(MultiBarReporter::new()),
    );

    if let Err(e) = orchestrator.prepare() {
        tracing::error!("Could not prepare download directory: {}", e);
        browser.close().await;
        return Err(e.into());
    }

    let shutdown = orchestrator.shutdown_handle();
    let (force_tx, force_rx) = tokio::sync::oneshot::channel::<()>();
    let ctrl_c = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            match handle_interrupt(&shutdown) {
                Interrupt::Graceful => {
                    warn!("Interrupt received, letting running tasks finish");
                    eprintln!("Finishing running downloads. Press Ctrl-C again to quit now.");
                }
                Interrupt::Force => {
                    warn!("Second interrupt received, stopping now");
                    let _ = force_tx.send(());
                    break;
                }
            }
        }
    });

    let report = tokio::select! {
        report = orchestrator.run(requests) => Some(report),
        Ok(()) = force_rx => None,
    };

    ctrl_c.abort();
    browser.close().await;
    report.ok_or_else(|| anyhow::anyhow!("Interrupted before the running downloads finished"))
}

#[cfg(not(feature = "browser"))]
async fn download(
    _config: &AppConfig,
    _requests: Vec<crate::slider::playlist::DownloadRequest>,
) -> Result<RunReport, Error> {
    Err(crate::slider::browser::SessionError::Unsupported.into())
}

/// Closing message, then the error count and one line per error.
fn summary_lines(summary: &LedgerSummary) -> Vec<String> {
    let mut lines = vec!["Download Finished - Thanks for using this tool!".to_string()];
    if summary.count > 0 {
        lines.push(format!("There were {} errors.", summary.count));
        lines.extend(summary.messages.iter().cloned());
    }
    lines
}

fn print_summary(summary: &LedgerSummary) {
    println!();
    for (i, line) in summary_lines(summary).into_iter().enumerate() {
        match i {
            0 => println!("{}", style(line).cyan().bold()),
            1 => println!("{}", style(line).red().bold()),
            _ => println!("{}", style(line).red()),
        }
    }
}
