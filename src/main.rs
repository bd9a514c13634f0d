use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use graph::Snapshot;
use promote_core::{
    export_snapshot, AnalyzeConfig, AnalyzeError, AnalyzeRequest, Analyzer, GitHistory,
    HistoryError, HistoryReader, Outcome, DEFAULT_SCAN_WINDOW, DEFAULT_TIMEOUT_SECS,
    EXIT_BACKEND_UNAVAILABLE, EXIT_INVALID_ARGS,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "promote")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Find upstream commits not yet promoted to a downstream stage", long_about = None)]
struct Cli {
    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report upstream commits still pending promotion
    Analyze(AnalyzeArgs),
    /// Capture both stages into a replayable snapshot file
    Snapshot(SnapshotArgs),
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Upstream stage (ref name or commit id)
    #[arg(long)]
    upstream: String,

    /// Downstream stage (ref name or commit id)
    #[arg(long)]
    downstream: String,

    /// Regex a sync-marker merge message must match
    #[arg(long, env = "PROMOTE_MARKER_PATTERN")]
    marker_pattern: Option<String>,

    /// Merge commits inspected when looking for a sync marker
    #[arg(long, env = "PROMOTE_SCAN_WINDOW", default_value_t = DEFAULT_SCAN_WINDOW)]
    scan_window: usize,

    /// Time budget in seconds
    #[arg(long, env = "PROMOTE_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Path to the repository
    #[arg(long, conflicts_with = "snapshot")]
    repo: Option<PathBuf>,

    /// Read history from a snapshot file instead of a repository
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Json)]
    format: Format,
}

#[derive(Args)]
struct SnapshotArgs {
    /// Path to the repository
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Upstream stage to capture
    #[arg(long)]
    upstream: String,

    /// Downstream stage to capture
    #[arg(long)]
    downstream: String,

    /// Snapshot file to write
    #[arg(long)]
    out: PathBuf,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Text,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version land here too
            let code = if err.use_stderr() { EXIT_INVALID_ARGS } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };

    if let Err(err) = init_logging(cli.verbose) {
        eprintln!("warning: {err:#}");
    }

    match cli.command {
        Commands::Analyze(args) => {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    eprintln!("error: failed to start runtime: {err}");
                    return ExitCode::from(EXIT_BACKEND_UNAVAILABLE);
                }
            };
            let code = runtime.block_on(analyze(args));
            // After a timeout a blocking walk may still be running; exit
            // without joining it
            runtime.shutdown_background();
            code
        }
        Commands::Snapshot(args) => match snapshot(args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error: {err:#}");
                ExitCode::from(snapshot_exit_code(&err))
            }
        },
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

async fn analyze(args: AnalyzeArgs) -> ExitCode {
    let format = args.format;
    let result = match open_history(args.repo.as_ref(), args.snapshot.as_ref()) {
        Ok(history) => {
            let config = AnalyzeConfig {
                marker_pattern: args.marker_pattern,
                scan_window: args.scan_window,
                timeout: Duration::from_secs(args.timeout),
                ..AnalyzeConfig::default()
            };
            let request = AnalyzeRequest::new(args.upstream, args.downstream);
            Analyzer::new(history, config).analyze(&request).await
        }
        Err(err) => Err(err),
    };

    let code = match &result {
        Ok(report) => {
            for warning in &report.warnings {
                eprintln!("warning: {warning}");
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(err.exit_code())
        }
    };

    let outcome = Outcome::from(result);
    match format {
        Format::Json => match outcome.to_json() {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("error: failed to encode report: {err}");
                return ExitCode::from(EXIT_BACKEND_UNAVAILABLE);
            }
        },
        Format::Text => {
            if let Outcome::Report(report) = &outcome {
                print!("{}", report.render_text());
            }
        }
    }
    code
}

fn open_history(
    repo: Option<&PathBuf>,
    snapshot: Option<&PathBuf>,
) -> std::result::Result<Arc<dyn HistoryReader>, AnalyzeError> {
    if let Some(path) = snapshot {
        let snapshot = Snapshot::load(path)
            .map_err(|err| AnalyzeError::BackendUnavailable(format!("{err:#}")))?;
        info!(path = %path.display(), commits = snapshot.commits.len(), "loaded snapshot");
        return Ok(Arc::new(snapshot.into_dag()));
    }

    let path = repo.cloned().unwrap_or_else(|| PathBuf::from("."));
    let history = GitHistory::open(&path)?;
    Ok(Arc::new(history))
}

fn snapshot(args: SnapshotArgs) -> Result<()> {
    let history = GitHistory::open(&args.repo)
        .with_context(|| format!("Failed to open repository at {}", args.repo.display()))?;
    let snapshot = export_snapshot(&history, &[args.upstream, args.downstream])
        .context("Failed to read stage history")?;
    snapshot
        .save(&args.out)
        .with_context(|| format!("Failed to write {}", args.out.display()))?;

    println!(
        "Wrote {} commits to {}",
        snapshot.commits.len(),
        args.out.display()
    );
    Ok(())
}

fn snapshot_exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<HistoryError>() {
        Some(history) => AnalyzeError::from(history.clone()).exit_code(),
        None => EXIT_BACKEND_UNAVAILABLE,
    }
}
