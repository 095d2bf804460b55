use anyhow::{anyhow, bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use fluxgen::config::{self, Config};
use fluxgen::model::{AspectRatio, BatchJob, GenerationParams, Model, OutputFormat};
use fluxgen::Orchestrator;

#[derive(Debug, Parser)]
#[command(author, version, about = "Queue FLUX image generations and wait for the results")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Model to use instead of `generation.model`
    #[arg(long)]
    model: Option<Model>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a single image
    Generate {
        /// Text prompt
        prompt: String,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Generate one image per line of a prompts file
    Batch {
        /// File with one prompt per line; blank lines are ignored
        #[arg(long)]
        prompts: PathBuf,
        /// Batch name (defaults to Batch_<timestamp>)
        #[arg(long)]
        name: Option<String>,
        /// Stop handing off prompts after the first invalid one
        #[arg(long)]
        stop_on_error: bool,
        #[command(flatten)]
        params: ParamArgs,
    },
    /// Print an example config file
    ExampleConfig,
}

#[derive(Debug, ClapArgs)]
struct ParamArgs {
    /// Named preset applied before the explicit overrides below
    #[arg(long)]
    preset: Option<String>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    #[arg(long)]
    steps: Option<u32>,
    #[arg(long)]
    guidance: Option<f64>,
    /// Safety tolerance, 0 (strict) to 3
    #[arg(long)]
    safety: Option<u8>,
    #[arg(long)]
    seed: Option<u64>,
    /// W:H, used by the ultra model
    #[arg(long)]
    aspect_ratio: Option<AspectRatio>,
    #[arg(long)]
    raw: bool,
    #[arg(long)]
    upsample: bool,
    #[arg(long)]
    format: Option<OutputFormat>,
}

impl ParamArgs {
    fn build(&self, cfg: &Config, prompt: &str) -> Result<GenerationParams> {
        let mut params = GenerationParams::new(prompt);
        if let Some(name) = &self.preset {
            let presets = cfg.presets();
            let preset = presets
                .get(name)
                .ok_or_else(|| anyhow!("unknown preset '{}'", name))?;
            preset.apply(&mut params);
        }
        if let Some(v) = self.width {
            params.width = v;
        }
        if let Some(v) = self.height {
            params.height = v;
        }
        if let Some(v) = self.steps {
            params.steps = v;
        }
        if let Some(v) = self.guidance {
            params.guidance = v;
        }
        if let Some(v) = self.safety {
            params.safety_tolerance = v;
        }
        if let Some(v) = self.aspect_ratio {
            params.aspect_ratio = v;
        }
        if let Some(v) = self.format {
            params.output_format = v;
        }
        params.seed = self.seed;
        params.raw_mode = self.raw;
        params.prompt_upsampling = self.upsample;
        Ok(params)
    }
}

fn read_prompts(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read prompts file: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    if let Command::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let mut cfg = config::load(Some(&args.config))?;
    if let Some(model) = args.model {
        cfg.generation.model = model;
    }
    cfg.ensure_dirs()?;

    let orchestrator = Orchestrator::from_config(&cfg)?;
    let status = orchestrator.status();

    let mut rx = status.subscribe();
    tokio::spawn(async move {
        let mut last_status = String::new();
        let mut last_label = String::new();
        while rx.changed().await.is_ok() {
            let snap = rx.borrow_and_update().clone();
            if snap.status != last_status {
                info!(status = %snap.status, "status");
                last_status = snap.status;
            }
            if snap.batch.label != last_label {
                info!(percent = snap.batch.percent, label = %snap.batch.label, "batch");
                last_label = snap.batch.label;
            }
        }
    });

    match args.command {
        Command::Generate { prompt, params } => {
            let params = params.build(&cfg, &prompt)?;
            let id = orchestrator.submit_generation(params)?;
            info!(task_id = %id, "generation queued");
        }
        Command::Batch {
            prompts,
            name,
            stop_on_error,
            params,
        } => {
            let prompts = read_prompts(&prompts)?;
            if prompts.is_empty() {
                bail!("no prompts provided for batch processing");
            }
            let base = params.build(&cfg, "")?;
            let job = match name {
                Some(name) => BatchJob::new(name, prompts, base),
                None => BatchJob::timestamped(prompts, base),
            }
            .continue_on_error(cfg.batch.continue_on_error && !stop_on_error);
            orchestrator.submit_batch(job)?;
        }
        Command::ExampleConfig => unreachable!("handled above"),
    }

    tokio::select! {
        _ = orchestrator.shutdown() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; abandoning queued work");
        }
    }

    let counts = status.task_counts();
    info!(
        ready = counts.ready,
        failed = counts.failed,
        timed_out = counts.timed_out,
        "done"
    );
    if counts.ready < counts.enqueued {
        bail!(
            "{} of {} generations did not produce an image",
            counts.enqueued - counts.ready,
            counts.enqueued
        );
    }
    Ok(())
}
