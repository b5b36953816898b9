use crate::{
    config::Config,
    engine::lopdf_backend::LopdfEngine,
    pipeline::Pipeline,
    util::{ensure_dir, now_rfc3339},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "question-splitter")]
#[command(about = "Split exam PDFs into one PDF per detected question")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./question-splitter.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List detected question markers.
    Scan {
        #[arg(long)]
        input: PathBuf,
    },
    /// Show the planned page regions per question.
    Plan {
        #[arg(long)]
        input: PathBuf,
    },
    /// Print document metadata and the course hint.
    Metadata {
        #[arg(long)]
        input: PathBuf,
    },
    /// Write one PDF per question.
    Run {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg = match resolve_config_path(args.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    let _guard = init_logging(&args, &cfg)?;

    match &args.cmd {
        Command::Scan { input } => scan(&cfg, input),
        Command::Plan { input } => plan(&cfg, input),
        Command::Metadata { input } => metadata(&cfg, input),
        Command::Run { input, out_dir } => run(&cfg, input, out_dir.as_deref()),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    ["question-splitter.toml", "question-splitter.example.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn init_logging(args: &Args, cfg: &Config) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Results go to stdout as JSON; logs stay on stderr.
    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let file_path = resolve_log_path(cfg);
    let (file_layer, guard) = if let Some(path) = file_path.as_deref() {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.paths.out_dir).join("question-splitter.log"))
}

fn pipeline(cfg: &Config) -> Result<Pipeline<LopdfEngine>> {
    Pipeline::new(cfg, LopdfEngine)
}

fn scan(cfg: &Config, input: &Path) -> Result<()> {
    validate_input(input)?;
    let matches = pipeline(cfg)?.scan(input)?;
    println!("{}", serde_json::to_string_pretty(&matches)?);
    Ok(())
}

fn plan(cfg: &Config, input: &Path) -> Result<()> {
    validate_input(input)?;
    let questions = pipeline(cfg)?.plan(input)?;
    println!("{}", serde_json::to_string_pretty(&questions)?);
    Ok(())
}

fn metadata(cfg: &Config, input: &Path) -> Result<()> {
    validate_input(input)?;
    let meta = pipeline(cfg)?.metadata(input)?;
    println!("{}", serde_json::to_string_pretty(&meta)?);
    Ok(())
}

fn run(cfg: &Config, input: &Path, out_override: Option<&Path>) -> Result<()> {
    validate_input(input)?;

    let out_root = out_override
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(&cfg.paths.out_dir));
    ensure_dir(&out_root)?;

    if cfg.debug.dump_effective_config {
        let raw = toml::to_string(cfg).unwrap_or_default();
        std::fs::write(out_root.join("effective-config.toml"), raw)?;
    }

    let started = now_rfc3339();
    let result = pipeline(cfg)?.run(input, &out_root)?;

    let status = if result.output_files.is_empty() {
        "failed"
    } else {
        "completed"
    };
    if result.matches.is_empty() {
        warn!("no questions found in {}", input.display());
    }
    info!(
        "status={status} question_count={} failed={}",
        result.output_files.len(),
        result.failed_count()
    );

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "status": status,
            "started": started,
            "finished": now_rfc3339(),
            "question_count": result.output_files.len(),
            "detected_markers": result.matches.len(),
            "failed_questions": result.failed_count(),
            "output_dir": result.output_dir,
            "output_files": result.output_files,
            "metadata": result.metadata,
        }))?
    );

    Ok(())
}

fn validate_input(input: &Path) -> Result<()> {
    if !input.exists() {
        return Err(anyhow!("input does not exist: {}", input.display()));
    }

    if let Some(ext) = input.extension().and_then(|s| s.to_str()) {
        if !ext.eq_ignore_ascii_case("pdf") {
            return Err(anyhow!(
                "input is not a PDF (convert it first): {}",
                input.display()
            ));
        }
    } else {
        warn!("input has no extension; assuming PDF: {}", input.display());
    }

    Ok(())
}
