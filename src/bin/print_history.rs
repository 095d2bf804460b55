use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};

use fluxgen::config::Generation as GenerationCfg;
use fluxgen::persistence::load_history;

#[derive(Debug, Parser)]
#[command(author, version, about = "Print the generation history")]
struct Args {
    /// Path to YAML config file (reads only `generation`)
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Show only the most recent N records
    #[arg(long)]
    last: Option<usize>,

    /// Print records as JSON instead of one line each
    #[arg(long)]
    json: bool,
}

#[derive(Debug, serde::Deserialize)]
struct GenerationOnlyConfig {
    generation: GenerationCfg,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let content = fs::read_to_string(&args.config)
        .with_context(|| format!("failed to read {}", args.config.display()))?;
    let cfg: GenerationOnlyConfig = serde_yaml::from_str(&content)?;

    let history = load_history(Path::new(&cfg.generation.history_file)).await?;
    let skip = args
        .last
        .map(|n| history.len().saturating_sub(n))
        .unwrap_or(0);
    let records = &history[skip..];

    if args.json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("no history yet");
    }
    for record in records {
        let p = &record.params;
        println!(
            "{} {} {}x{} steps={} guidance={} seed={} :: {}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            record.filename,
            p.width,
            p.height,
            p.steps,
            p.guidance,
            p.seed.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
            p.prompt_preview()
        );
    }
    Ok(())
}
