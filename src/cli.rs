//! Command-line interface.

use crate::agent::CrewEvent;
use crate::config::Config;
use crate::export::{self, Artifact};
use crate::pipeline::{Pipeline, PipelineError, Run, Stage};
use crate::session::RunStore;
use crate::web::{self, AppState};
use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a tracing filter, e.g. `cobol_bridge=debug`.
const LOG_ENV: &str = "COBOL_BRIDGE_LOG";
const EXIT_INTERRUPTED: u8 = 3;

/// Migrate COBOL programs to Java through a BRD, with LLM agents
#[derive(Parser, Debug)]
#[command(name = "cobol-bridge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Debug logging to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: ~/.cobol-bridge/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyze COBOL source and generate a BRD
    Brd(SourceArgs),
    /// Generate Java code from a run's BRD
    Convert(StageArgs),
    /// Evaluate the Java code and optimize it from the evaluation
    Optimize(StageArgs),
    /// Apply enterprise-grade refinements to optimized Java code
    Refine(StageArgs),
    /// Run every remaining stage
    Run(SourceArgs),
    /// Start the local web UI
    Serve(ServeArgs),
    /// List, show or delete saved runs
    Runs(RunsArgs),
    /// View or modify configuration
    Config(ConfigArgs),
}

/// Which saved run to continue.
#[derive(Args, Debug, Default)]
pub struct RunSelect {
    /// Run ID (or a unique prefix of at least 4 characters)
    #[arg(long = "run", value_name = "ID", conflicts_with = "last")]
    pub run: Option<String>,

    /// Use the most recently updated run (default)
    #[arg(long)]
    pub last: bool,
}

#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Output format
    #[arg(short = 'o', long, default_value = "text", value_enum)]
    pub output_format: OutputFormat,

    /// Quiet mode (final artifact only, no progress)
    #[arg(short, long)]
    pub quiet: bool,

    /// Write all available artifacts into this directory
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Model to use instead of the configured one
    #[arg(short, long)]
    pub model: Option<String>,
}

#[derive(Args, Debug)]
pub struct SourceArgs {
    /// COBOL source file (use "-" to read from stdin)
    #[arg(short, long, value_name = "FILE", conflicts_with_all = ["run", "last"])]
    pub input: Option<PathBuf>,

    /// Business glossary file
    #[arg(short, long, value_name = "FILE", requires = "input")]
    pub glossary: Option<PathBuf>,

    #[command(flatten)]
    pub select: RunSelect,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug)]
pub struct StageArgs {
    #[command(flatten)]
    pub select: RunSelect,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (default from config)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (default from config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Don't open a browser
    #[arg(long)]
    pub no_open: bool,

    /// Model to use instead of the configured one
    #[arg(short, long)]
    pub model: Option<String>,
}

#[derive(Args, Debug)]
pub struct RunsArgs {
    #[command(subcommand)]
    pub action: Option<RunsAction>,
}

#[derive(Subcommand, Debug)]
pub enum RunsAction {
    /// List recent runs
    List {
        /// Maximum number of runs to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,

        #[arg(short = 'o', long, default_value = "text", value_enum)]
        output_format: OutputFormat,
    },
    /// Show a run's state and history, or print one of its artifacts
    Show {
        /// Run ID or unique prefix
        id: String,

        /// Print this artifact instead of the summary
        #[arg(short, long, value_enum)]
        artifact: Option<ArtifactArg>,
    },
    /// Write a run's artifacts into a directory
    Export {
        /// Run ID or unique prefix
        id: String,

        #[arg(long, value_name = "DIR", default_value = ".")]
        output_dir: PathBuf,
    },
    /// Delete a run
    Delete {
        /// Run ID or unique prefix
        id: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ArtifactArg {
    Brd,
    /// The BRD as a Word document
    BrdDocx,
    Java,
    Evaluation,
    Original,
}

impl From<ArtifactArg> for Artifact {
    fn from(a: ArtifactArg) -> Self {
        match a {
            ArtifactArg::Brd => Artifact::Brd,
            ArtifactArg::BrdDocx => Artifact::BrdDocx,
            ArtifactArg::Java => Artifact::Java,
            ArtifactArg::Evaluation => Artifact::Evaluation,
            ArtifactArg::Original => Artifact::Original,
        }
    }
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Get a configuration value
    Get {
        /// Key to get (provider, model, temperature, web.port, ...)
        key: String,
    },
    /// Set a configuration value
    Set {
        /// Key to set; `api_key.<provider>` stores an API key
        key: String,
        /// Value to set
        value: String,
    },
    /// Show config file path
    Path,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    StreamJson,
}

/// Final JSON output.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonEvent<'a> {
    Done {
        run: &'a Run,
        completed: &'a [Stage],
        next_stage: Option<Stage>,
    },
    Error {
        message: String,
        run_id: Option<&'a str>,
    },
}

/// Stages a command executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Single(Stage),
    Remaining,
}

/// Initialize logging. Enabled by `-v` or `COBOL_BRIDGE_LOG`, otherwise
/// only `default` (if any) is shown.
pub fn init_tracing(verbose: bool, default: Option<&str>) {
    let filter = match std::env::var(LOG_ENV) {
        Ok(spec) => EnvFilter::new(spec),
        Err(_) if verbose => EnvFilter::new("cobol_bridge=debug,warn"),
        Err(_) => match default {
            Some(spec) => EnvFilter::new(spec),
            None => return,
        },
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Run the parsed command line.
pub async fn run(cli: Cli) -> ExitCode {
    let default_log = matches!(cli.command, Commands::Serve(_)).then_some("cobol_bridge=info");
    init_tracing(cli.verbose, default_log);

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    match dispatch(cli.command, &config_path).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn dispatch(command: Commands, config_path: &Path) -> Result<ExitCode> {
    let load = || Config::load_from(config_path);
    match command {
        Commands::Brd(args) => source_command(&load()?, args, Plan::Single(Stage::Brd)).await,
        Commands::Run(args) => source_command(&load()?, args, Plan::Remaining).await,
        Commands::Convert(args) => stage_command(&load()?, args, Stage::Convert).await,
        Commands::Optimize(args) => stage_command(&load()?, args, Stage::Optimize).await,
        Commands::Refine(args) => stage_command(&load()?, args, Stage::Refine).await,
        Commands::Serve(args) => serve(&load()?, args).await,
        Commands::Runs(args) => runs(&load()?, args),
        Commands::Config(args) => config(args, config_path),
    }
}

fn open_store(config: &Config) -> Result<RunStore> {
    let path = config.runs_db_path();
    RunStore::open(&path).with_context(|| format!("Failed to open {}", path.display()))
}

/// Read a file, or stdin for `-`.
fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        return Ok(buffer);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn select_run(store: &RunStore, select: &RunSelect) -> Result<Run> {
    match &select.run {
        Some(id) => Ok(store.load(id)?),
        None => store
            .latest()?
            .context("No saved runs. Start one with `cobol-bridge brd --input FILE`"),
    }
}

async fn source_command(config: &Config, args: SourceArgs, plan: Plan) -> Result<ExitCode> {
    let pipeline = Pipeline::from_config(config, args.output.model.as_deref())?;
    let store = open_store(config)?;

    let mut run = match &args.input {
        Some(path) => {
            let cobol = read_input(path)?;
            let glossary = match &args.glossary {
                Some(path) => read_input(path)?,
                None => String::new(),
            };
            let run = Run::new(cobol, glossary);
            if run.source().is_empty() {
                bail!(PipelineError::EmptyInput);
            }
            store.save(&run)?;
            run
        }
        None if args.select.run.is_none() && !args.select.last => {
            bail!("Provide COBOL source with --input FILE, or continue a run with --run ID / --last")
        }
        None => select_run(&store, &args.select)?,
    };

    execute(&pipeline, &store, &mut run, plan, &args.output).await
}

async fn stage_command(config: &Config, args: StageArgs, stage: Stage) -> Result<ExitCode> {
    let pipeline = Pipeline::from_config(config, args.output.model.as_deref())?;
    let store = open_store(config)?;
    let mut run = select_run(&store, &args.select)?;
    execute(&pipeline, &store, &mut run, Plan::Single(stage), &args.output).await
}

/// Print crew progress as it arrives.
fn spawn_printer(
    mut rx: mpsc::Receiver<CrewEvent>,
    format: OutputFormat,
    quiet: bool,
) -> JoinHandle<io::Result<()>> {
    tokio::spawn(async move {
        let mut stdout = io::stdout();
        let mut stderr = io::stderr();
        while let Some(event) = rx.recv().await {
            print_event(&mut stdout, &mut stderr, event, format, quiet)?;
        }
        Ok(())
    })
}

/// Write one event: streamed text to `out`, progress to `err`.
fn print_event(
    out: &mut impl Write,
    err: &mut impl Write,
    event: CrewEvent,
    format: OutputFormat,
    quiet: bool,
) -> io::Result<()> {
    match format {
        OutputFormat::StreamJson => {
            if let Ok(json) = serde_json::to_string(&event) {
                writeln!(out, "{json}")?;
            }
        }
        OutputFormat::Text if !quiet => match event {
            CrewEvent::TaskStarted {
                index,
                total,
                role,
                expected_output,
            } => {
                writeln!(err, "\n==> [{}/{total}] {role}: {expected_output}", index + 1)?;
            }
            CrewEvent::TextDelta { text } => {
                write!(out, "{text}")?;
                out.flush()?;
            }
            CrewEvent::Retry {
                reason,
                delay_secs,
                attempt,
            } => {
                // Partial text of the failed attempt is already on screen.
                writeln!(out, "\n--- attempt {attempt} failed, output above is incomplete ---")?;
                out.flush()?;
                writeln!(err, "{reason}; retrying in {delay_secs}s (attempt {attempt})")?;
            }
            CrewEvent::TaskFinished { usage, .. } => {
                writeln!(out)?;
                writeln!(
                    err,
                    "    ({} input / {} output tokens)",
                    usage.input_tokens, usage.output_tokens
                )?;
            }
        },
        _ => {}
    }
    Ok(())
}

async fn execute(
    pipeline: &Pipeline,
    store: &RunStore,
    run: &mut Run,
    plan: Plan,
    out: &OutputArgs,
) -> Result<ExitCode> {
    let abort = CancellationToken::new();
    let ctrl_c = {
        let abort = abort.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                abort.cancel();
            }
        })
    };

    let (tx, rx) = mpsc::channel::<CrewEvent>(100);
    let printer = spawn_printer(rx, out.output_format, out.quiet);
    let model = pipeline.settings().model.clone();

    let result = match plan {
        Plan::Single(stage) => match pipeline.run_stage(stage, run, &tx, &abort).await {
            Ok(usage) => store
                .save_stage(run, stage, &model, usage)
                .map(|()| vec![stage])
                .map_err(PipelineError::from),
            Err(e) => Err(e),
        },
        Plan::Remaining => {
            pipeline
                .run_all(run, &tx, &abort, |stage, run, usage| {
                    store.save_stage(run, stage, &model, usage)
                })
                .await
        }
    };
    drop(tx);
    ctrl_c.abort();
    printer.await??;

    match result {
        Ok(completed) => {
            if let Some(dir) = &out.output_dir {
                for path in export::export_run(run, dir)? {
                    eprintln!("Wrote {}", path.display());
                }
            }
            report(run, &completed, out, pipeline.settings().stream)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_cancelled() => {
            eprintln!(
                "\nInterrupted. Continue with: cobol-bridge {} --run {}",
                next_command(run),
                short_id(&run.id)
            );
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
        Err(e) => {
            match out.output_format {
                OutputFormat::Text => eprintln!("\nError: {e}"),
                OutputFormat::Json | OutputFormat::StreamJson => {
                    let json = serde_json::to_string(&JsonEvent::Error {
                        message: e.to_string(),
                        run_id: Some(&run.id),
                    })?;
                    println!("{json}");
                }
            }
            Ok(ExitCode::from(1))
        }
    }
}

/// Print the outcome of a successful command.
fn report(run: &Run, completed: &[Stage], out: &OutputArgs, streamed: bool) -> Result<()> {
    match out.output_format {
        OutputFormat::Text => {
            if out.quiet || !streamed {
                print!("{}", final_artifact(run, completed));
            }
            if !out.quiet {
                eprintln!("\nRun {} ({})", short_id(&run.id), run.title());
                if let Some(level) = run.level {
                    eprintln!("Java: {}", level.description());
                }
                if let Some(next) = run.next_stage() {
                    eprintln!("Next: cobol-bridge {} --run {}", next.id(), short_id(&run.id));
                }
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&JsonEvent::Done {
                run,
                completed,
                next_stage: run.next_stage(),
            })?;
            println!("{json}");
        }
        OutputFormat::StreamJson => {
            let json = serde_json::to_string(&JsonEvent::Done {
                run,
                completed,
                next_stage: run.next_stage(),
            })?;
            println!("{json}");
        }
    }
    Ok(())
}

/// The artifact the last completed stage produced, ready to print.
fn final_artifact(run: &Run, completed: &[Stage]) -> String {
    match completed.last() {
        Some(Stage::Brd) => run.brd.as_deref().map(export::brd_document),
        _ => run.java.as_deref().map(export::extract_java),
    }
    .unwrap_or_default()
}

fn next_command(run: &Run) -> &'static str {
    run.next_stage().map_or("run", |s| s.id())
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

async fn serve(config: &Config, args: ServeArgs) -> Result<ExitCode> {
    let pipeline = Pipeline::from_config(config, args.model.as_deref())?;
    let store = open_store(config)?;
    let shutdown = CancellationToken::new();

    let state = Arc::new(AppState::new(
        pipeline,
        store,
        tokio::runtime::Handle::current(),
        shutdown.clone(),
    ));
    let host = args.host.unwrap_or_else(|| config.web.host.clone());
    let port = args.port.unwrap_or(config.web.port);
    let open_browser = !args.no_open;

    let server = {
        let shutdown = shutdown.clone();
        tokio::task::spawn_blocking(move || {
            web::serve(state, &host, port, open_browser, shutdown)
        })
    };
    let ctrl_c = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        })
    };

    let result = server.await?;
    ctrl_c.abort();
    result?;
    Ok(ExitCode::SUCCESS)
}

fn runs(config: &Config, args: RunsArgs) -> Result<ExitCode> {
    let store = open_store(config)?;
    let action = args.action.unwrap_or(RunsAction::List {
        limit: 20,
        output_format: OutputFormat::Text,
    });

    match action {
        RunsAction::List {
            limit,
            output_format,
        } => {
            let runs = store.list(limit)?;
            if output_format != OutputFormat::Text {
                println!("{}", serde_json::to_string_pretty(&runs)?);
            } else if runs.is_empty() {
                println!("No saved runs.");
            } else {
                println!("{:<10} {:<20} {:<11} {:<9} UPDATED", "ID", "PROGRAM", "LEVEL", "NEXT");
                for r in runs {
                    println!(
                        "{:<10} {:<20} {:<11} {:<9} {}",
                        short_id(&r.id),
                        r.program_id.as_deref().unwrap_or("-"),
                        r.level.map_or("-", |l| l.id()),
                        r.next_stage.map_or("done", |s| s.id()),
                        r.updated_at.format("%Y-%m-%d %H:%M"),
                    );
                }
            }
        }
        RunsAction::Show { id, artifact } => {
            let run = store.load(&id)?;
            if let Some(artifact) = artifact {
                let artifact = Artifact::from(artifact);
                let Some(file) = export::render(&run, artifact)? else {
                    bail!("Run {} has no {} yet", short_id(&run.id), artifact.id());
                };
                let mut stdout = io::stdout().lock();
                stdout.write_all(&file.content)?;
                stdout.flush()?;
                return Ok(ExitCode::SUCCESS);
            }

            println!("Run:      {}", run.id);
            println!("Program:  {}", run.title());
            println!("Created:  {}", run.created_at.format("%Y-%m-%d %H:%M:%S"));
            println!("Updated:  {}", run.updated_at.format("%Y-%m-%d %H:%M:%S"));
            if let Some(level) = run.level {
                println!("Level:    {} ({})", level.id(), level.description());
            }
            println!(
                "Tokens:   {} input / {} output",
                run.usage.input_tokens, run.usage.output_tokens
            );
            for stage in Stage::ALL {
                let mark = if run.is_done(stage) { "x" } else { " " };
                println!("  [{mark}] {}", stage.label());
            }
            let history = store.history(&run.id)?;
            if !history.is_empty() {
                println!("History:");
                for record in history {
                    println!(
                        "  {} {:<9} {} ({} in / {} out)",
                        record.finished_at.format("%Y-%m-%d %H:%M:%S"),
                        record.stage.id(),
                        record.model,
                        record.usage.input_tokens,
                        record.usage.output_tokens
                    );
                }
            }
        }
        RunsAction::Export { id, output_dir } => {
            let run = store.load(&id)?;
            let written = export::export_run(&run, &output_dir)?;
            if written.is_empty() {
                println!("Run {} has no artifacts yet.", short_id(&run.id));
            }
            for path in written {
                println!("{}", path.display());
            }
        }
        RunsAction::Delete { id } => {
            let run = store.load(&id)?;
            store.delete(&run.id)?;
            println!("Deleted run {}", run.id);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn config(args: ConfigArgs, path: &Path) -> Result<ExitCode> {
    let mut config = Config::load_from(path)?;

    match args.action {
        None => {
            let mut shown = config.clone();
            for key in shown.api_keys.values_mut() {
                *key = "(set)".to_string();
            }
            print!("{}", toml::to_string_pretty(&shown)?);
        }
        Some(ConfigAction::Path) => println!("{}", path.display()),
        Some(ConfigAction::Get { key }) => match config.get(&key) {
            Some(value) => println!("{value}"),
            None if key.starts_with("api_key.") => {
                let provider = key.trim_start_matches("api_key.");
                let set = config.api_keys.contains_key(provider);
                println!("{}", if set { "(set)" } else { "(not set)" });
            }
            None if is_optional_key(&key) => println!("(not set)"),
            None => bail!("Unknown config key: {key}"),
        },
        Some(ConfigAction::Set { key, value }) => {
            config.set(&key, &value)?;
            config
                .save_to(path)
                .with_context(|| format!("Failed to save {}", path.display()))?;
            println!("Updated {key}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn is_optional_key(key: &str) -> bool {
    matches!(key, "max_tokens" | "base_url" | "prompts_dir")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Usage;

    fn printed(events: Vec<CrewEvent>, format: OutputFormat, quiet: bool) -> (String, String) {
        let (mut out, mut err) = (Vec::new(), Vec::new());
        for event in events {
            print_event(&mut out, &mut err, event, format, quiet).unwrap();
        }
        (String::from_utf8(out).unwrap(), String::from_utf8(err).unwrap())
    }

    #[test]
    fn test_retry_marks_discarded_output() {
        let (out, err) = printed(
            vec![
                CrewEvent::TextDelta { text: "public class Pay".into() },
                CrewEvent::Retry {
                    reason: "Network error".into(),
                    delay_secs: 2,
                    attempt: 1,
                },
                CrewEvent::TextDelta { text: "public class Payroll {}".into() },
            ],
            OutputFormat::Text,
            false,
        );
        assert_eq!(
            out,
            "public class Pay\n--- attempt 1 failed, output above is incomplete ---\npublic class Payroll {}"
        );
        assert_eq!(err, "Network error; retrying in 2s (attempt 1)\n");
    }

    #[test]
    fn test_quiet_and_stream_json_output() {
        let events = || {
            vec![
                CrewEvent::TextDelta { text: "brd".into() },
                CrewEvent::TaskFinished {
                    index: 0,
                    role: "BRD Writer".into(),
                    usage: Usage::default(),
                },
            ]
        };
        assert_eq!(printed(events(), OutputFormat::Text, true), (String::new(), String::new()));

        let (out, err) = printed(events(), OutputFormat::StreamJson, false);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], r#"{"type":"text_delta","text":"brd"}"#);
        assert!(lines[1].starts_with(r#"{"type":"task_finished","index":0"#));
        assert!(err.is_empty());
    }

    #[test]
    fn test_parse_brd_with_input() {
        let cli =
            Cli::try_parse_from(["cobol-bridge", "brd", "--input", "pay.cbl", "-g", "terms.txt"])
                .unwrap();
        let Commands::Brd(args) = cli.command else {
            panic!("Expected Brd command");
        };
        assert_eq!(args.input, Some(PathBuf::from("pay.cbl")));
        assert_eq!(args.glossary, Some(PathBuf::from("terms.txt")));
        assert_eq!(args.output.output_format, OutputFormat::Text);
    }

    #[test]
    fn test_parse_stage_with_run() {
        let cli = Cli::try_parse_from(["cobol-bridge", "optimize", "--run", "abcd1234", "-q"])
            .unwrap();
        let Commands::Optimize(args) = cli.command else {
            panic!("Expected Optimize command");
        };
        assert_eq!(args.select.run.as_deref(), Some("abcd1234"));
        assert!(args.output.quiet);
    }

    #[test]
    fn test_input_conflicts_with_run() {
        assert!(
            Cli::try_parse_from(["cobol-bridge", "brd", "-i", "a.cbl", "--run", "abcd"]).is_err()
        );
        assert!(Cli::try_parse_from(["cobol-bridge", "convert", "--run", "abcd", "--last"]).is_err());
    }

    #[test]
    fn test_glossary_requires_input() {
        assert!(Cli::try_parse_from(["cobol-bridge", "brd", "--last", "-g", "terms.txt"]).is_err());
    }

    #[test]
    fn test_parse_run_json_with_output_dir() {
        let cli = Cli::try_parse_from([
            "cobol-bridge",
            "run",
            "-i",
            "-",
            "-o",
            "json",
            "--output-dir",
            "out",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("Expected Run command");
        };
        assert_eq!(args.input, Some(PathBuf::from("-")));
        assert_eq!(args.output.output_format, OutputFormat::Json);
        assert_eq!(args.output.output_dir, Some(PathBuf::from("out")));
    }

    #[test]
    fn test_parse_serve_and_global_flags() {
        let cli =
            Cli::try_parse_from(["cobol-bridge", "serve", "-p", "9000", "--no-open", "-v"]).unwrap();
        assert!(cli.verbose);
        let Commands::Serve(args) = cli.command else {
            panic!("Expected Serve command");
        };
        assert_eq!(args.port, Some(9000));
        assert!(args.no_open);
    }

    #[test]
    fn test_parse_runs_show_artifact() {
        let cli =
            Cli::try_parse_from(["cobol-bridge", "runs", "show", "abcd", "--artifact", "java"])
                .unwrap();
        let Commands::Runs(RunsArgs {
            action: Some(RunsAction::Show { id, artifact }),
        }) = cli.command
        else {
            panic!("Expected runs show");
        };
        assert_eq!(id, "abcd");
        assert!(matches!(artifact, Some(ArtifactArg::Java)));
    }

    #[test]
    fn test_parse_config_set() {
        let cli = Cli::try_parse_from(["cobol-bridge", "config", "set", "model", "gpt-4o"]).unwrap();
        let Commands::Config(ConfigArgs {
            action: Some(ConfigAction::Set { key, value }),
        }) = cli.command
        else {
            panic!("Expected config set");
        };
        assert_eq!((key.as_str(), value.as_str()), ("model", "gpt-4o"));
    }

    #[test]
    fn test_select_run() {
        let store = RunStore::in_memory().unwrap();
        assert!(select_run(&store, &RunSelect::default()).is_err());

        let first = Run::new("PROGRAM-ID. FIRST.", "");
        let mut second = Run::new("PROGRAM-ID. SECOND.", "");
        second.updated_at = first.updated_at + chrono::Duration::seconds(1);
        store.save(&first).unwrap();
        store.save(&second).unwrap();

        let latest = select_run(&store, &RunSelect::default()).unwrap();
        assert_eq!(latest.id, second.id);
        let chosen = select_run(
            &store,
            &RunSelect {
                run: Some(first.id.clone()),
                last: false,
            },
        )
        .unwrap();
        assert_eq!(chosen.id, first.id);
    }

    #[test]
    fn test_final_artifact() {
        let mut run = Run::new("STOP RUN.", "");
        run.brd = Some("Overview".into());
        assert!(final_artifact(&run, &[Stage::Brd]).starts_with("# Business Requirements"));

        run.java = Some("```java\nclass A {}\n```".into());
        assert_eq!(final_artifact(&run, &[Stage::Convert]), "class A {}\n");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
