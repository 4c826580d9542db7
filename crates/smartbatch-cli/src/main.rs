//! Command-line shell over the smartbatch engine.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use smartbatch::broadcast::JobQueryParams;
use smartbatch::db::{default_database_path, Database};
use smartbatch::{
    load_settings, BatchProcessingConfig, Dataset, Engine, FileArtifactStore, GenerationId,
    InteractionMode, JobStatus, JobStatusSnapshot, LogFormat, LoggingConfig, StepEdits,
    StepOutcome,
};

#[derive(Parser)]
#[command(name = "smartbatch")]
#[command(about = "Generate a coherent set of documents from one dataset")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Log level (trace, debug, info, warn, error); SMARTBATCH_LOG overrides
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    log_format: LogFormat,

    /// Job database path (default: ~/.smartbatch/data/smartbatch.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Keep job records in memory only
    #[arg(long, global = true)]
    no_db: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate one document per dataset record
    Run {
        /// Batch settings file (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Dataset file (JSON array of flat objects)
        #[arg(short, long)]
        dataset: PathBuf,

        /// Directory receiving the generated documents
        #[arg(short, long)]
        output: PathBuf,

        /// Override the interaction mode from the settings file
        #[arg(short, long)]
        mode: Option<InteractionMode>,

        /// Record this principal as the job owner
        #[arg(long)]
        owner: Option<String>,
    },

    /// Print the status snapshot of one job
    Status {
        generation_id: String,
    },

    /// List recorded jobs, newest first
    List {
        #[arg(long)]
        status: Option<JobStatus>,

        #[arg(long, default_value_t = 20)]
        limit: u64,
    },

    /// List jobs a previous run left unfinished
    Incomplete {
        /// Settle them: skip pending documents and fail in-flight ones
        #[arg(long)]
        settle: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        level: cli.log_level.clone(),
        format: cli.log_format,
        ansi: true,
    };
    if let Err(e) = smartbatch::init_logging(&logging) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            log::error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match &cli.command {
        Commands::Run {
            config,
            dataset,
            output,
            mode,
            owner,
        } => {
            let engine = Arc::new(build_engine(&cli, output)?);
            run_job(engine, config, dataset, *mode, owner.as_deref())
        }
        Commands::Status { generation_id } => {
            let engine = build_engine(&cli, &std::env::temp_dir())?;
            let snapshot = engine.job_status(&GenerationId::from(generation_id.as_str()))?;
            print_json(&snapshot)?;
            Ok(0)
        }
        Commands::List { status, limit } => {
            let engine = build_engine(&cli, &std::env::temp_dir())?;
            let page = engine.list_jobs(&JobQueryParams {
                status: *status,
                owner: None,
                limit: Some(*limit),
                offset: None,
            })?;
            print_json(&page)?;
            Ok(0)
        }
        Commands::Incomplete { settle } => {
            let engine = build_engine(&cli, &std::env::temp_dir())?;
            let mut jobs = engine.incomplete_jobs()?;
            if *settle {
                jobs = jobs
                    .iter()
                    .map(|job| engine.cancel(&job.generation_id))
                    .collect::<std::result::Result<_, _>>()?;
                info!("Settled {} unfinished job(s)", jobs.len());
            }
            print_json(&jobs)?;
            Ok(0)
        }
    }
}

fn build_engine(cli: &Cli, output: &Path) -> Result<Engine> {
    let store = Arc::new(FileArtifactStore::new(output));
    let mut builder = Engine::builder(store);

    if !cli.no_db {
        let path = match &cli.db {
            Some(path) => path.clone(),
            None => default_database_path().context("Could not determine home directory")?,
        };
        let db = Database::open(&path)
            .with_context(|| format!("Failed to open job database {}", path.display()))?;
        builder = builder.database(db);
    }
    Ok(builder.build())
}

fn run_job(
    engine: Arc<Engine>,
    config_path: &Path,
    dataset_path: &Path,
    mode: Option<InteractionMode>,
    owner: Option<&str>,
) -> Result<i32> {
    let settings = load_settings(config_path)?;
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let config = BatchProcessingConfig::from_settings(&settings, base_dir)?;
    let config = match mode {
        Some(mode) => config.with_mode(mode),
        None => config,
    };
    let dataset = Dataset::from_json_file(dataset_path)?;
    info!("Loaded {} record(s)", dataset.len());

    let snapshot = match config.mode() {
        InteractionMode::Batch => {
            let id = match owner {
                Some(owner) => engine.submit_batch_as(owner, dataset, &config)?,
                None => engine.submit_batch(dataset, &config)?,
            };
            install_cancel_handler(Arc::clone(&engine), id.clone())?;
            info!("Submitted generation {}", id);
            engine.wait_for(&id)?
        }
        InteractionMode::Stepwise => {
            let id = match owner {
                Some(owner) => engine.start_stepwise_as(owner, dataset, &config)?,
                None => engine.start_stepwise(dataset, &config)?,
            };
            install_cancel_handler(Arc::clone(&engine), id.clone())?;
            run_stepwise(&engine, &id)?
        }
    };

    print_json(&snapshot)?;
    Ok(match snapshot.status {
        JobStatus::Completed => 0,
        JobStatus::PartiallyCompleted => 2,
        _ => 1,
    })
}

fn install_cancel_handler(engine: Arc<Engine>, id: GenerationId) -> Result<()> {
    ctrlc::set_handler(move || {
        log::warn!("Interrupted, cancelling generation {}", id);
        if let Err(e) = engine.cancel(&id) {
            log::error!("Cancel failed: {}", e);
        }
    })
    .context("Failed to install Ctrl-C handler")
}

/// Prompts after each document. An empty line confirms; `fact.KEY=VALUE`
/// and `term.KEY=VALUE` lines queue edits; `q` cancels.
fn run_stepwise(engine: &Engine, id: &GenerationId) -> Result<JobStatusSnapshot> {
    let mut task = engine.start_step(id)?;
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        println!(
            "Document {} {} after {} attempt(s)",
            task.index(),
            task.status(),
            task.attempts()
        );
        if let Some(artifact) = task.artifact() {
            println!("  {}", artifact.location);
        }
        if let Some(error) = task.error() {
            println!("  error: {}", error.message);
        }

        let mut edits = StepEdits::new();
        loop {
            print!("edit> ");
            io::stdout().flush()?;
            let Some(line) = lines.next() else {
                break;
            };
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                break;
            }
            if line == "q" {
                return Ok(engine.cancel(id)?);
            }
            edits = match parse_edit(line) {
                Some(("fact", key, value)) => edits.fact(key, value),
                Some(("term", key, value)) => edits.term(key, value),
                _ => {
                    println!("expected fact.KEY=VALUE or term.KEY=VALUE");
                    edits
                }
            };
        }

        match engine.confirm_step(id, Some(edits))? {
            StepOutcome::Task(next) => task = next,
            StepOutcome::JobComplete(snapshot) => return Ok(snapshot),
        }
    }
}

fn parse_edit(line: &str) -> Option<(&str, &str, &str)> {
    let (target, value) = line.split_once('=')?;
    let (kind, key) = target.trim().split_once('.')?;
    if key.is_empty() {
        return None;
    }
    Some((kind, key, value.trim()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}
