mod display;
mod history;
mod train;

use std::io::{BufRead, Read};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use lacrime_ai::{Embedder, Refiner, SeverityContext, TextEmbedder};
use lacrime_core::{CrimeProfile, SeverityCategory, Settings, normalize};
use tracing_subscriber::EnvFilter;

use crate::history::SessionHistory;

#[derive(Parser)]
#[command(name = "lacrime", version)]
#[command(about = "Crime severity scoring from structured crime profiles")]
struct Cli {
    /// TOML settings file; missing means defaults.
    #[arg(long, env = "LACRIME_CONFIG", default_value = "lacrime.toml", global = true)]
    config: PathBuf,

    /// Regressor artifact. Training is skipped while this file exists.
    #[arg(long, global = true)]
    artifact: Option<PathBuf>,

    /// Directory with model.onnx and tokenizer.json.
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// MOCODE lookup CSV.
    #[arg(long, global = true)]
    mocodes: Option<PathBuf>,

    /// Training corpus CSV.
    #[arg(long, global = true)]
    corpus: Option<PathBuf>,

    /// Arrow IPC cache of corpus embeddings.
    #[arg(long, global = true)]
    cache: Option<PathBuf>,

    /// Bearer key for the LLM endpoint. Without it, scores are not refined.
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the severity regressor, or report on the existing artifact
    Train {
        /// Corpus rows to sample before training
        #[arg(long, conflicts_with = "full")]
        sample: Option<usize>,

        /// Train on every corpus row
        #[arg(long)]
        full: bool,

        #[arg(long)]
        n_trees: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Score one crime profile given as JSON
    Predict {
        /// JSON file, or `-` for stdin
        #[arg(long, default_value = "-")]
        profile: String,

        /// Print the prediction as JSON
        #[arg(long)]
        json: bool,
    },

    /// Score one JSON profile per stdin line, then list them by severity
    Session {
        /// Print each prediction as a JSON line
        #[arg(long)]
        json: bool,
    },

    /// Show the normalized text and proxy label for a narrative
    Label {
        #[arg(long)]
        text: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    apply_overrides(&mut settings, &cli);

    match cli.command {
        Commands::Train {
            sample,
            full,
            n_trees,
            seed,
        } => {
            if full {
                settings.training.sample = None;
            } else if sample.is_some() {
                settings.training.sample = sample;
            }
            if let Some(n) = n_trees {
                settings.training.n_trees = n;
            }
            if let Some(s) = seed {
                settings.training.seed = s;
            }

            let mut embedder = load_embedder(&settings)?;
            let (regressor, stats) = train::load_or_fit(&settings, &mut embedder)?;
            train::print_report(&stats, &regressor, &settings);
        }

        Commands::Predict { profile, json } => {
            let text = if profile == "-" {
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            } else {
                std::fs::read_to_string(&profile)
                    .with_context(|| format!("reading profile {profile}"))?
            };
            let profile: CrimeProfile =
                serde_json::from_str(&text).context("parsing crime profile JSON")?;

            let mut ctx = build_context(&settings)?;
            let prediction = ctx.predict_severity(&profile).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&prediction)?);
            } else {
                print!("{}", display::prediction_card(&prediction));
            }
        }

        Commands::Session { json } => {
            let mut ctx = build_context(&settings)?;
            let mut history = SessionHistory::new();

            for (lineno, line) in std::io::stdin().lock().lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let profile: CrimeProfile = match serde_json::from_str(&line) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(line = lineno + 1, error = %e, "skipping invalid profile");
                        continue;
                    }
                };

                let prediction = ctx.predict_severity(&profile).await?;
                if json {
                    println!("{}", serde_json::to_string(&prediction)?);
                } else {
                    print!("{}", display::prediction_card(&prediction));
                    println!();
                }
                history.record(&profile, &prediction);
            }

            if !json {
                print!("{}", display::history_listing(&history));
            }
        }

        Commands::Label { text } => {
            let cleaned = normalize(&text);
            let category = SeverityCategory::classify(&cleaned);
            println!("  {:<12} {}", "normalized", cleaned);
            println!("  {:<12} {}", "category", category.as_str());
            println!("  {:<12} {}", "label", category.score());
        }
    }

    Ok(())
}

/// Layer CLI flags and environment over the file settings.
fn apply_overrides(settings: &mut Settings, cli: &Cli) {
    let paths = &mut settings.paths;
    if let Some(p) = &cli.artifact {
        paths.artifact = p.clone();
    }
    if let Some(p) = &cli.model_dir {
        paths.model_dir = p.clone();
    }
    if let Some(p) = &cli.mocodes {
        paths.mocodes = p.clone();
    }
    if let Some(p) = &cli.corpus {
        paths.corpus = p.clone();
    }
    if let Some(p) = &cli.cache {
        paths.embedding_cache = Some(p.clone());
    }
    if cli.api_key.is_some() {
        settings.llm.api_key = cli.api_key.clone();
    }
}

fn load_embedder(settings: &Settings) -> anyhow::Result<Embedder> {
    Embedder::load(&settings.paths.model_dir)
        .with_context(|| format!("loading embedder from {}", settings.paths.model_dir.display()))
}

/// Load everything a prediction needs: embedder, regressor (training it on
/// first use), MOCODE table and LLM client.
fn build_context(settings: &Settings) -> anyhow::Result<SeverityContext> {
    let mut embedder = load_embedder(settings)?;
    let (regressor, _) = train::load_or_fit(settings, &mut embedder)?;
    let mocodes = lacrime_store::load_mocode_table(&settings.paths.mocodes)
        .context("loading MOCODE table")?;
    let refiner = Refiner::new(&settings.llm).context("building LLM client")?;

    tracing::info!(
        dim = embedder.dim(),
        mocodes = mocodes.len(),
        refine = refiner.is_enabled(),
        "severity context ready"
    );
    SeverityContext::new(Box::new(embedder), regressor, mocodes, refiner)
}
