//! Command-line host for the fsn watch engine.
//!
//! Watches one or more directories and prints every change event until
//! interrupted.
//!
//! # Usage
//!
//! ```bash
//! fsn-watch [OPTIONS] <ROOT>...
//!
//! # Print events as text
//! fsn-watch ./src ./assets
//!
//! # One JSON object per line, 10ms coalescing window
//! fsn-watch --format json --latency-ms 10 ./src
//!
//! # Load settings from a file
//! fsn-watch --config fsn.json ./src
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use fsn_core::{ColorScheme, Config, OutputFormat};
use fsn_watcher::{ChangeEvent, ChannelSink, Engine, EventKind};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Watch directories and print canonical change events.
///
/// Every event is one of `created`, `removed`, `modified`, `invalidate`
/// (rescan everything under the watched roots) or `unknown`.
#[derive(Parser)]
#[command(name = "fsn-watch", version, about, long_about = None)]
struct Cli {
    /// Directories to watch recursively.
    #[arg(required = true, value_name = "ROOT")]
    roots: Vec<Utf8PathBuf>,

    /// JSON configuration file.
    #[arg(short, long, env = "FSN_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Coalescing latency in milliseconds (overrides the config file).
    #[arg(short, long, env = "FSN_LATENCY_MS")]
    latency_ms: Option<u64>,

    /// Output format (overrides the config file).
    #[arg(short, long, value_enum)]
    format: Option<FormatArg>,

    /// Enable verbose logging (debug level).
    #[arg(short, long)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long)]
    no_color: bool,
}

/// Event output format.
#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    /// `kind path` per line.
    Text,
    /// One JSON object per line.
    Json,
}

impl From<FormatArg> for OutputFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Text => Self::Text,
            FormatArg::Json => Self::Json,
        }
    }
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
/// `notify` is filtered to `warn` level.
fn init_tracing(verbose: bool, color: ColorScheme) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(format!("{level},notify=warn"))
    });

    let use_ansi = match color {
        ColorScheme::Always => true,
        ColorScheme::Never => false,
        _ => std::env::var("NO_COLOR").is_err(),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(use_ansi)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Builds a [`Config`] from the optional config file and CLI overrides.
///
/// # Errors
///
/// Returns an error if the config file cannot be loaded or the result is
/// invalid.
fn build_config(cli: &Cli) -> color_eyre::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(latency_ms) = cli.latency_ms {
        config.watch.latency_ms = latency_ms;
    }
    if let Some(format) = cli.format {
        config.output.format = format.into();
    }
    if cli.no_color {
        config.output.color = ColorScheme::Never;
    }

    config.validate()?;
    Ok(config)
}

// =============================================================================
// COMMAND IMPLEMENTATION
// =============================================================================

/// Resolves when the process is asked to shut down.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Writes one event in the configured format.
fn print_event(
    out: &mut impl Write,
    format: OutputFormat,
    event: &ChangeEvent,
) -> color_eyre::Result<()> {
    match format {
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(event)?)?,
        _ => writeln!(out, "{event}")?,
    }
    Ok(())
}

/// Roots the host must rescan after `event`, empty unless it invalidates.
///
/// A pathless invalidation covers every root.
fn rescan_roots<'a>(roots: &'a [Utf8PathBuf], event: &ChangeEvent) -> Vec<&'a Utf8PathBuf> {
    if !event.kind.requires_rescan() {
        return Vec::new();
    }
    roots.iter().filter(|root| event.is_under(root)).collect()
}

/// Per-kind event counts for the shutdown summary.
#[derive(Debug, Default)]
struct EventTally {
    counts: [u64; EventKind::ALL.len()],
}

impl EventTally {
    fn record(&mut self, kind: EventKind) {
        if let Some(count) = usize::try_from(kind.code())
            .ok()
            .and_then(|index| self.counts.get_mut(index))
        {
            *count += 1;
        }
    }

    fn count(&self, kind: EventKind) -> u64 {
        usize::try_from(kind.code())
            .ok()
            .and_then(|index| self.counts.get(index))
            .copied()
            .unwrap_or(0)
    }

    fn log_summary(&self) {
        for kind in EventKind::ALL {
            let count = self.count(kind);
            if count > 0 {
                info!(kind = %kind, count, "Event summary");
            }
        }
    }
}

/// Prints one event and warns about roots that need a rescan.
fn handle_event(
    out: &mut impl Write,
    format: OutputFormat,
    roots: &[Utf8PathBuf],
    tally: &mut EventTally,
    event: &ChangeEvent,
) -> color_eyre::Result<()> {
    tally.record(event.kind);
    for root in rescan_roots(roots, event) {
        tracing::warn!(root = %root, "Changes under root were not tracked, rescan required");
    }
    print_event(out, format, event)
}

/// Watches `roots` until interrupted.
///
/// # Errors
///
/// Returns an error if the session cannot be started or stopped, or output
/// cannot be written.
async fn run_watch(roots: Vec<Utf8PathBuf>, config: Config) -> color_eyre::Result<ExitCode> {
    let engine =
        Arc::new(Engine::new().with_thread_name_prefix(config.watch.thread_name_prefix.clone()));
    let (sink, mut events) = ChannelSink::channel();
    let session = engine.start_with_config(roots.clone(), &config.watch, sink)?;
    info!(session = %session, roots = roots.len(), "Watching for changes, press Ctrl-C to stop");

    let format = config.output.format;
    let mut tally = EventTally::default();
    let stdout = std::io::stdout();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                handle_event(&mut stdout.lock(), format, &roots, &mut tally, &event)?;
            }
            result = &mut shutdown => {
                result?;
                info!("Received shutdown signal, stopping");
                break;
            }
        }
    }

    let stopper = Arc::clone(&engine);
    let outcome = tokio::task::spawn_blocking(move || stopper.stop(session)).await?;

    // Batches queued before the stop were still delivered.
    let mut handle = stdout.lock();
    while let Ok(event) = events.try_recv() {
        handle_event(&mut handle, format, &roots, &mut tally, &event)?;
    }
    handle.flush()?;
    tally.log_summary();

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(error) if error.is_invalid_state() => {
            tracing::warn!(session = %session, "{error}");
            Ok(ExitCode::FAILURE)
        }
        Err(error) => Err(error.into()),
    }
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main]
async fn main() -> color_eyre::Result<ExitCode> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments and load configuration
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    // 3. Initialize tracing
    init_tracing(cli.verbose, config.output.color);

    run_watch(cli.roots, config).await
}
