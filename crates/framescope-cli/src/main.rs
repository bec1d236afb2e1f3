use std::future::Future;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use env_logger::Env;
use framescope_core::PipelineSummary;
use framescope_core::config::PipelineConfig;
use framescope_core::pipeline;
use framescope_core::sink::{JsonLinesSink, RawSink, SqliteFrameStore, to_hex};
use framescope_core::source::{
    FanIn, PcapFileSource, SourceError, SourceReport, fan_in, open_all,
};
use glob::glob;
use log::{info, warn};
use serde::Serialize;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (commit ",
    env!("FRAMESCOPE_BUILD_COMMIT"),
    ", ",
    env!("FRAMESCOPE_BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "framescope")]
#[command(version, long_version = LONG_VERSION)]
#[command(
    about = "Passive TCP capture and length-prefixed frame extraction.",
    long_about = None,
    after_help = "Examples:\n  framescope read session.pcapng\n  framescope read 'captures/*.pcap' --db frames.sqlite3\n  framescope frames --db frames.sqlite3 --type 300"
)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Only log warnings and errors, and skip the run summary
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract frames from PCAP/PCAPNG files.
    #[command(
        after_help = "Examples:\n  framescope read session.pcapng\n  framescope read a.pcap b.pcapng --format raw > frames.bin"
    )]
    Read {
        /// Capture files or glob patterns
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Extract frames from live interfaces until Ctrl-C.
    #[cfg(feature = "live")]
    Capture {
        /// Interface to capture on (repeatable); every interface when omitted
        #[arg(short = 'i', long = "interface")]
        interfaces: Vec<String>,

        #[command(flatten)]
        run: RunArgs,
    },
    /// List capture interfaces.
    #[cfg(feature = "live")]
    Interfaces,
    /// Print frames from a SQLite frame store as JSON lines.
    Frames {
        /// Frame store written by `read --db` or `capture --db`
        #[arg(long)]
        db: PathBuf,

        /// Only frames with this type code
        #[arg(long = "type")]
        type_code: Option<u32>,

        #[arg(long, default_value_t = 100)]
        limit: u32,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Store frames in this SQLite database instead of printing them
    #[arg(long, conflicts_with = "format")]
    db: Option<PathBuf>,

    /// Output written to stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// BPF filter for live capture
    #[arg(long)]
    filter: Option<String>,

    /// Capture snapshot length in bytes
    #[arg(long)]
    snaplen: Option<i32>,

    /// Extraction tick in milliseconds
    #[arg(long)]
    tick_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    /// One JSON object per frame
    Json,
    /// Frames re-encoded to wire form
    Raw,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Read { inputs, run } => cmd_read(&inputs, &run, config, cli.quiet).await,
        #[cfg(feature = "live")]
        Commands::Capture { interfaces, run } => {
            cmd_capture(&interfaces, &run, config, cli.quiet).await
        }
        #[cfg(feature = "live")]
        Commands::Interfaces => cmd_interfaces(),
        Commands::Frames {
            db,
            type_code,
            limit,
        } => cmd_frames(&db, type_code, limit).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            if let Some(hint) = err.hint {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(2)
        }
    }
}

#[derive(Debug)]
struct CliError {
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            message: message.into(),
            hint,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::new(format!("{err:#}"), None)
    }
}

/// Where extracted frames go for one run.
enum Output {
    Store(SqliteFrameStore),
    Json,
    Raw,
}

/// Printed to stderr once a run ends.
#[derive(Serialize)]
struct RunReport {
    sources: Vec<SourceReport>,
    #[serde(flatten)]
    summary: PipelineSummary,
}

async fn cmd_read(
    inputs: &[PathBuf],
    run: &RunArgs,
    config_path: Option<&Path>,
    quiet: bool,
) -> Result<(), CliError> {
    let config = load_config(config_path, run)?;
    if run.filter.is_some() {
        warn!("--filter only applies to live capture; ignored for capture files");
    }

    let mut files = Vec::new();
    let mut rejected = Vec::new();
    for input in inputs {
        match resolve_input_paths(input) {
            Ok(paths) => {
                for path in paths {
                    match validate_input_file(&path) {
                        Ok(()) => files.push(path),
                        Err(err) => rejected.push((path.display().to_string(), err)),
                    }
                }
            }
            Err(err) => rejected.push((input.display().to_string(), err)),
        }
    }

    let mut opened = open_all(files.iter().map(|p| p.display().to_string()), |name| {
        PcapFileSource::open(Path::new(name))
    });
    if opened.sources.is_empty() && opened.failures.is_empty() && rejected.len() == 1 {
        // A lone bad input keeps its own message and hint.
        if let Some((_, err)) = rejected.pop() {
            return Err(err);
        }
    }
    for (name, err) in rejected {
        warn!("skipping input {name}: {err}");
        opened.failures.push((
            name.clone(),
            SourceError::Unavailable {
                name,
                reason: err.to_string(),
            },
        ));
    }
    let sources = opened.require_any().map_err(|err| {
        CliError::new(
            err.to_string(),
            Some("check that the inputs are readable .pcap or .pcapng files".to_string()),
        )
    })?;

    let output = open_output(run).await?;
    let feed = fan_in(sources, config.capture.queue_capacity);
    info!("reading {} capture file(s)", feed.handle.source_count());
    let report = drive(&config, feed, output, shutdown_signal()).await?;
    print_report(&report, quiet)
}

#[cfg(feature = "live")]
async fn cmd_capture(
    interfaces: &[String],
    run: &RunArgs,
    config_path: Option<&Path>,
    quiet: bool,
) -> Result<(), CliError> {
    use framescope_core::source::{LiveCapture, list_interfaces};

    let config = load_config(config_path, run)?;
    let names = if interfaces.is_empty() {
        list_interfaces().map_err(|err| CliError::new(err.to_string(), Some(capture_hint())))?
    } else {
        interfaces.to_vec()
    };

    let opened = open_all(&names, |name| LiveCapture::open(name, &config.capture));
    let sources = opened
        .require_any()
        .map_err(|err| CliError::new(err.to_string(), Some(capture_hint())))?;

    let output = open_output(run).await?;
    let feed = fan_in(sources, config.capture.queue_capacity);
    info!(
        "capturing on {} interface(s) with filter '{}'; Ctrl-C stops",
        feed.handle.source_count(),
        config.capture.filter
    );
    let report = drive(&config, feed, output, shutdown_signal()).await?;
    print_report(&report, quiet)
}

#[cfg(feature = "live")]
fn cmd_interfaces() -> Result<(), CliError> {
    let names = framescope_core::source::list_interfaces()
        .map_err(|err| CliError::new(err.to_string(), Some(capture_hint())))?;
    for name in names {
        println!("{name}");
    }
    Ok(())
}

#[cfg(feature = "live")]
fn capture_hint() -> String {
    "live capture needs libpcap and capture privileges (root or CAP_NET_RAW)".to_string()
}

async fn cmd_frames(db: &Path, type_code: Option<u32>, limit: u32) -> Result<(), CliError> {
    if !db.is_file() {
        return Err(CliError::new(
            format!("frame store not found: {}", db.display()),
            Some("write one first with `framescope read <FILE> --db <PATH>`".to_string()),
        ));
    }
    let store = SqliteFrameStore::open(db)
        .await
        .with_context(|| format!("Failed to open frame store: {}", db.display()))?;
    let frames = store
        .frames_by_type(type_code, limit)
        .await
        .context("Failed to query frame store")?;
    store.close().await;

    let mut out = io::stdout().lock();
    for frame in &frames {
        let line = serde_json::json!({
            "id": frame.id,
            "captured_at": frame.captured_at,
            "src": frame.src,
            "dst": frame.dst,
            "type_code": frame.type_code,
            "size": frame.payload_len,
            "payload_hex": to_hex(&frame.payload),
        });
        writeln!(out, "{line}").context("Failed to write to stdout")?;
    }
    Ok(())
}

fn load_config(path: Option<&Path>, run: &RunArgs) -> Result<PipelineConfig, CliError> {
    let mut config = match path {
        Some(path) => PipelineConfig::load(path).map_err(|err| {
            CliError::new(
                err.to_string(),
                Some(format!("fix the configuration file {}", path.display())),
            )
        })?,
        None => PipelineConfig::default(),
    };

    if let Some(filter) = &run.filter {
        config.capture.filter = filter.clone();
    }
    if let Some(snaplen) = run.snaplen {
        config.capture.snaplen = snaplen;
    }
    if let Some(tick_ms) = run.tick_ms {
        config.framing.tick_interval_ms = tick_ms;
    }
    config.validate().map_err(|err| {
        CliError::new(
            err.to_string(),
            Some("check the command-line overrides".to_string()),
        )
    })?;
    Ok(config)
}

async fn open_output(run: &RunArgs) -> Result<Output, CliError> {
    match (&run.db, run.format) {
        (Some(db), _) => {
            let store = SqliteFrameStore::open(db)
                .await
                .with_context(|| format!("Failed to open frame store: {}", db.display()))?;
            Ok(Output::Store(store))
        }
        (None, OutputFormat::Json) => Ok(Output::Json),
        (None, OutputFormat::Raw) => Ok(Output::Raw),
    }
}

/// Run the pipeline over `feed`, then stop and collect its readers.
async fn drive<F>(
    config: &PipelineConfig,
    feed: FanIn,
    output: Output,
    shutdown: F,
) -> Result<RunReport, CliError>
where
    F: Future<Output = ()>,
{
    let FanIn { packets, handle } = feed;
    let summary = match output {
        Output::Store(store) => pipeline::run(config, packets, store, shutdown).await,
        Output::Json => {
            let sink = JsonLinesSink::new(BufWriter::new(io::stdout()));
            pipeline::run(config, packets, sink, shutdown).await
        }
        Output::Raw => {
            let sink = RawSink::new(BufWriter::new(io::stdout()));
            pipeline::run(config, packets, sink, shutdown).await
        }
    };

    handle.stop();
    let sources = tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("capture readers did not shut down")?;
    let summary = summary.context("frame extraction failed")?;
    Ok(RunReport { sources, summary })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
}

fn print_report(report: &RunReport, quiet: bool) -> Result<(), CliError> {
    if quiet {
        return Ok(());
    }
    let json = serde_json::to_string_pretty(report).context("JSON serialization failed")?;
    eprintln!("{json}");
    Ok(())
}

fn validate_input_file(input: &Path) -> Result<(), CliError> {
    if !input.exists() {
        return Err(CliError::new(
            format!("input file not found: {}", input.display()),
            Some("use a .pcap or .pcapng file".to_string()),
        ));
    }
    if !input.is_file() {
        return Err(CliError::new(
            format!("input is not a file: {}", input.display()),
            Some("use a .pcap or .pcapng file".to_string()),
        ));
    }
    let ext = input
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if ext != "pcap" && ext != "pcapng" {
        return Err(CliError::new(
            format!("unsupported input format '{}'", input.display()),
            Some("expected a .pcap or .pcapng file".to_string()),
        ));
    }
    Ok(())
}

/// A plain path resolves to itself; a glob pattern to every file it
/// matches, in path order.
fn resolve_input_paths(input: &Path) -> Result<Vec<PathBuf>, CliError> {
    let pattern = input.to_string_lossy();
    if !is_glob_pattern(&pattern) {
        return Ok(vec![input.to_path_buf()]);
    }

    let paths = glob(&pattern).map_err(|err| {
        CliError::new(
            format!("invalid input pattern '{}'", pattern),
            Some(format!("pattern error: {}", err.msg)),
        )
    })?;
    let mut matches = Vec::new();
    for entry in paths {
        let path = entry.map_err(|err| {
            CliError::new(
                format!("invalid input pattern '{}'", pattern),
                Some(format!("pattern error: {}", err)),
            )
        })?;
        if path.is_file() {
            matches.push(path);
        }
    }

    if matches.is_empty() {
        return Err(CliError::new(
            format!("no files match pattern '{}'", pattern),
            Some("check the path or quote the pattern; expected .pcap or .pcapng".to_string()),
        ));
    }
    Ok(matches)
}

fn is_glob_pattern(input: &str) -> bool {
    input.contains('*') || input.contains('?') || input.contains('[')
}
