//! Integrity CLI - Command-line interface for Behavior Integrity
//!
//! Commands:
//! - typing: Analyse keystroke batches into a TypingAnalysis (batch mode)
//! - faces: Replay face tracking frames and print the events they trigger
//! - run: Route a mixed multi-session record stream from stdin (streaming mode)
//! - config: Print the resolved engine configuration

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use behavior_integrity::face::FaceAnalyzer;
use behavior_integrity::keystroke::{KeystrokeBatch, KeystrokeBatchResponse};
use behavior_integrity::{
    analyze_batches, parse_batch, EngineConfig, FaceTrackingEventPayload, MonitorError,
    SessionRegistry, SessionReport, ENGINE_VERSION,
};

/// Integrity - behavioral integrity monitoring for instrumented chat sessions
#[derive(Parser)]
#[command(name = "integrity")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Analyse keystroke dynamics and face tracking for session integrity", long_about = None)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log state transitions and skipped batches to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse keystroke batches of one session (batch mode)
    Typing {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Session id (defaults to the first batch's)
        #[arg(long)]
        session_id: Option<String>,

        /// Pretty-print the analysis
        #[arg(long)]
        pretty: bool,
    },

    /// Replay face tracking frames of one session
    Faces {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Session id used for event ids
        #[arg(long, default_value = "cli")]
        session_id: String,

        /// Print the tracking summary after the events
        #[arg(long)]
        summary: bool,
    },

    /// Process a multi-session NDJSON record stream from stdin (streaming mode)
    Run {
        /// Flush output after each record (--flush false to buffer)
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        flush: bool,
    },

    /// Print the resolved configuration as TOML
    Config,
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

/// One input record of the `run` stream
#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum StreamRecord {
    Open {
        session_id: String,
    },
    Batch {
        session_id: String,
        batch: KeystrokeBatch,
    },
    /// Frames stay unparsed here; a malformed one is discarded by its session
    Frame {
        session_id: String,
        frame: serde_json::Value,
    },
    Close {
        session_id: String,
    },
}

impl StreamRecord {
    fn session_id(&self) -> &str {
        match self {
            StreamRecord::Open { session_id }
            | StreamRecord::Batch { session_id, .. }
            | StreamRecord::Frame { session_id, .. }
            | StreamRecord::Close { session_id } => session_id,
        }
    }
}

/// One output record of the `run` stream
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum StreamOutput {
    BatchResponse {
        session_id: String,
        response: KeystrokeBatchResponse,
    },
    Event {
        session_id: String,
        event: FaceTrackingEventPayload,
    },
    Report {
        report: SessionReport,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        error: CliError,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), IntegrityCliError> {
    let config = match cli.config.as_deref() {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Typing {
            input,
            input_format,
            session_id,
            pretty,
        } => cmd_typing(&input, input_format, session_id, pretty, &config),

        Commands::Faces {
            input,
            input_format,
            session_id,
            summary,
        } => cmd_faces(&input, input_format, &session_id, summary, &config),

        Commands::Run { flush } => cmd_run(flush, config),

        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn cmd_typing(
    input: &Path,
    input_format: InputFormat,
    session_id: Option<String>,
    pretty: bool,
    config: &EngineConfig,
) -> Result<(), IntegrityCliError> {
    let input_data = read_input(input)?;
    let batches: Vec<KeystrokeBatch> = match input_format {
        InputFormat::Ndjson => non_empty_lines(&input_data)
            .map(parse_batch)
            .collect::<Result<_, _>>()?,
        InputFormat::Json => serde_json::from_str(&input_data)?,
    };

    let session_id = match session_id.or_else(|| batches.first().map(|b| b.session_id.clone())) {
        Some(id) => id,
        None => return Err(IntegrityCliError::NoRecords),
    };

    let analysis = analyze_batches(&session_id, batches, config)?;
    let rendered = if pretty {
        serde_json::to_string_pretty(&analysis)?
    } else {
        serde_json::to_string(&analysis)?
    };
    println!("{}", rendered);
    Ok(())
}

fn cmd_faces(
    input: &Path,
    input_format: InputFormat,
    session_id: &str,
    summary: bool,
    config: &EngineConfig,
) -> Result<(), IntegrityCliError> {
    let input_data = read_input(input)?;
    // Frames are parsed one by one so a malformed frame is discarded, not fatal
    let frames: Vec<String> = match input_format {
        InputFormat::Ndjson => non_empty_lines(&input_data).map(str::to_string).collect(),
        InputFormat::Json => serde_json::from_str::<Vec<serde_json::Value>>(&input_data)?
            .iter()
            .map(serde_json::Value::to_string)
            .collect(),
    };

    if frames.is_empty() {
        return Err(IntegrityCliError::NoRecords);
    }

    let mut analyzer = FaceAnalyzer::new(session_id, config);
    let mut stdout = io::stdout().lock();
    for frame in &frames {
        for event in analyzer.ingest_json(frame) {
            writeln!(stdout, "{}", serde_json::to_string(&event)?)?;
        }
    }

    if summary {
        writeln!(stdout, "{}", serde_json::to_string(analyzer.summary())?)?;
    }
    stdout.flush()?;
    Ok(())
}

fn cmd_run(flush: bool, config: EngineConfig) -> Result<(), IntegrityCliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let (registry, mut events) = SessionRegistry::new(config);

    if atty::is(atty::Stream::Stdin) {
        eprintln!("Reading NDJSON records from stdin (Ctrl-D to finish)");
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // A bad record is reported and skipped; the other sessions keep going
        let mut outputs = Vec::new();
        match serde_json::from_str::<StreamRecord>(trimmed) {
            Ok(record) => {
                let session_id = record.session_id().to_string();
                if let Err(e) = runtime.block_on(route_record(&registry, record, &mut outputs)) {
                    warn!(session_id = %session_id, error = %e, "record rejected");
                    outputs.push(StreamOutput::Error {
                        session_id: Some(session_id),
                        error: engine_error(e),
                    });
                }
            }
            Err(e) => {
                warn!(error = %e, "unparseable record skipped");
                outputs.push(StreamOutput::Error {
                    session_id: None,
                    error: CliError::from(IntegrityCliError::ParseError(format!(
                        "Failed to parse record: {}",
                        e
                    ))),
                });
            }
        }

        while let Ok(tagged) = events.try_recv() {
            outputs.push(StreamOutput::Event {
                session_id: tagged.session_id,
                event: tagged.event,
            });
        }

        for output in &outputs {
            writeln!(stdout, "{}", serde_json::to_string(output)?)?;
        }
        if flush {
            stdout.flush()?;
        }
    }

    // Close whatever the stream left open
    for session_id in registry.active_sessions() {
        let output = match runtime.block_on(registry.close_session(&session_id)) {
            Ok(report) => StreamOutput::Report { report },
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "session could not be closed");
                StreamOutput::Error {
                    session_id: Some(session_id),
                    error: engine_error(e),
                }
            }
        };
        writeln!(stdout, "{}", serde_json::to_string(&output)?)?;
    }
    stdout.flush()?;

    Ok(())
}

async fn route_record(
    registry: &SessionRegistry,
    record: StreamRecord,
    outputs: &mut Vec<StreamOutput>,
) -> Result<(), MonitorError> {
    let session_id = record.session_id().to_string();
    let is_open = registry.active_sessions().contains(&session_id);

    match record {
        StreamRecord::Open { .. } => registry.open_session(&session_id).await,
        StreamRecord::Batch { batch, .. } => {
            if !is_open {
                registry.open_session(&session_id).await?;
            }
            let response = registry.ingest_batch(&session_id, batch).await?;
            outputs.push(StreamOutput::BatchResponse {
                session_id,
                response,
            });
            Ok(())
        }
        StreamRecord::Frame { frame, .. } => {
            if !is_open {
                registry.open_session(&session_id).await?;
            }
            registry
                .ingest_frame_json(&session_id, frame.to_string())
                .await?;
            Ok(())
        }
        StreamRecord::Close { .. } => {
            let report = registry.close_session(&session_id).await?;
            outputs.push(StreamOutput::Report { report });
            Ok(())
        }
    }
}

fn read_input(input: &Path) -> Result<String, IntegrityCliError> {
    if input.to_string_lossy() == "-" {
        if atty::is(atty::Stream::Stdin) {
            eprintln!("Reading from stdin (Ctrl-D to finish)");
        }
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn non_empty_lines(data: &str) -> impl Iterator<Item = &str> {
    data.lines().map(str::trim).filter(|line| !line.is_empty())
}

// Error types

#[derive(Debug)]
enum IntegrityCliError {
    Io(io::Error),
    Engine(MonitorError),
    Json(serde_json::Error),
    NoRecords,
    ParseError(String),
}

impl From<io::Error> for IntegrityCliError {
    fn from(e: io::Error) -> Self {
        IntegrityCliError::Io(e)
    }
}

impl From<MonitorError> for IntegrityCliError {
    fn from(e: MonitorError) -> Self {
        IntegrityCliError::Engine(e)
    }
}

impl From<serde_json::Error> for IntegrityCliError {
    fn from(e: serde_json::Error) -> Self {
        IntegrityCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<IntegrityCliError> for CliError {
    fn from(e: IntegrityCliError) -> Self {
        match e {
            IntegrityCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            IntegrityCliError::Engine(e) => engine_error(e),
            IntegrityCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            IntegrityCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            IntegrityCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some(
                    "Each line needs a \"kind\" of open, batch, frame or close and a session_id"
                        .to_string(),
                ),
            },
        }
    }
}

fn engine_error(e: MonitorError) -> CliError {
    let (code, hint) = match &e {
        MonitorError::SessionMismatch { .. } => (
            "SESSION_MISMATCH",
            "Pass --session-id or split the input per session",
        ),
        MonitorError::UnknownSession(_) | MonitorError::SessionClosed(_) => (
            "UNKNOWN_SESSION",
            "Open the session before sending records for it",
        ),
        MonitorError::SessionExists(_) => ("SESSION_EXISTS", "Close the session before reopening it"),
        MonitorError::InvalidBatch(_) => (
            "INVALID_BATCH",
            "Batches need sessionId, batchIndex, keystrokes, startTime and endTime",
        ),
        MonitorError::InvalidFrame(_) => (
            "INVALID_FRAME",
            "Frames need timestamp, face_detected, face_count, eyes, expression and head_pose",
        ),
        MonitorError::Config(_) | MonitorError::Toml(_) => {
            ("CONFIG_ERROR", "Run 'integrity config' to see the expected layout")
        }
        MonitorError::Json(_) => ("JSON_ERROR", "Check JSON syntax"),
        MonitorError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
    };
    CliError {
        code: code.to_string(),
        message: e.to_string(),
        hint: Some(hint.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(line: &str) -> StreamRecord {
        serde_json::from_str(line).unwrap()
    }

    #[tokio::test]
    async fn test_rejected_record_leaves_other_sessions_running() {
        let (registry, _events) = SessionRegistry::new(EngineConfig::default());
        let mut outputs = Vec::new();

        route_record(&registry, record(r#"{"kind":"open","session_id":"a"}"#), &mut outputs)
            .await
            .unwrap();
        let reopen =
            route_record(&registry, record(r#"{"kind":"open","session_id":"a"}"#), &mut outputs)
                .await;
        assert!(matches!(reopen, Err(MonitorError::SessionExists(_))));

        // A frame missing its required fields is absorbed by the session
        route_record(
            &registry,
            record(r#"{"kind":"frame","session_id":"b","frame":{"timestamp":0}}"#),
            &mut outputs,
        )
        .await
        .unwrap();
        assert_eq!(registry.active_sessions(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.face_summary("b").await.unwrap().frames_discarded, 1);

        route_record(&registry, record(r#"{"kind":"close","session_id":"a"}"#), &mut outputs)
            .await
            .unwrap();
        assert!(matches!(outputs.last(), Some(StreamOutput::Report { .. })));
    }

    #[test]
    fn test_error_output_shape() {
        let output = StreamOutput::Error {
            session_id: Some("a".to_string()),
            error: engine_error(MonitorError::SessionExists("a".to_string())),
        };
        let value = serde_json::to_value(&output).unwrap();
        assert_eq!(value["kind"], "error");
        assert_eq!(value["session_id"], "a");
        assert_eq!(value["error"]["code"], "SESSION_EXISTS");
    }

    #[test]
    fn test_flush_can_be_turned_off() {
        let cli = Cli::parse_from(["integrity", "run", "--flush", "false"]);
        assert!(matches!(cli.command, Commands::Run { flush: false }));
        let cli = Cli::parse_from(["integrity", "run"]);
        assert!(matches!(cli.command, Commands::Run { flush: true }));
    }
}
