//! Training pipeline: reads the narrative corpus, labels it, embeds it (or
//! reuses an embedding cache), then loads or fits the severity regressor.

use std::collections::BTreeMap;
use std::time::Instant;

use anyhow::Context;
use lacrime_ai::{
    ForestParams, ModelSource, SeverityRegressor, TextEmbedder, TrainingData, embed_all,
    load_or_train,
};
use lacrime_core::{SeverityCategory, Settings, normalize};
use lacrime_store::{Sample, StoreError};
use tracing::{info, warn};

/// Texts embedded between progress updates.
const PROGRESS_CHUNK: usize = 512;

pub struct TrainStats {
    pub source: ModelSource,
    /// Corpus rows per proxy-label category; empty when the artifact was loaded.
    pub histogram: BTreeMap<SeverityCategory, usize>,
    pub elapsed_secs: f64,
}

pub fn forest_params(settings: &Settings) -> ForestParams {
    ForestParams {
        n_trees: settings.training.n_trees,
        seed: settings.training.seed,
        test_fraction: settings.training.test_fraction,
    }
}

/// Load the regressor artifact, or build training data and fit one.
pub fn load_or_fit(
    settings: &Settings,
    embedder: &mut dyn TextEmbedder,
) -> anyhow::Result<(SeverityRegressor, TrainStats)> {
    let start = Instant::now();
    let mut histogram = BTreeMap::new();

    let (regressor, source) = load_or_train(
        &settings.paths.artifact,
        &forest_params(settings),
        || {
            let (data, hist) = prepare_training_data(settings, embedder)?;
            histogram = hist;
            Ok(data)
        },
    )
    .with_context(|| format!("loading regressor {}", settings.paths.artifact.display()))?;

    Ok((
        regressor,
        TrainStats {
            source,
            histogram,
            elapsed_secs: start.elapsed().as_secs_f64(),
        },
    ))
}

/// Read, normalise, label and embed the corpus.
pub fn prepare_training_data(
    settings: &Settings,
    embedder: &mut dyn TextEmbedder,
) -> anyhow::Result<(TrainingData, BTreeMap<SeverityCategory, usize>)> {
    let training = &settings.training;
    let sample = training.sample.map(|size| Sample {
        size,
        seed: training.seed,
    });

    let texts = lacrime_store::load_training_corpus(
        &settings.paths.corpus,
        &training.text_column,
        sample,
    )
    .context("reading training corpus")?;
    eprintln!(
        "  Read {} narratives from {}",
        texts.len(),
        settings.paths.corpus.display()
    );

    let cleaned: Vec<String> = texts.iter().map(|t| normalize(t)).collect();

    let mut histogram = BTreeMap::new();
    let labels: Vec<f64> = cleaned
        .iter()
        .map(|t| {
            let category = SeverityCategory::classify(t);
            *histogram.entry(category).or_insert(0) += 1;
            category.score() as f64
        })
        .collect();
    for (category, count) in &histogram {
        info!(category = category.as_str(), count, "proxy labels");
    }

    let embeddings = match cached_embeddings(settings, cleaned.len())? {
        Some(embeddings) => embeddings,
        None => {
            let embeddings = embed_with_progress(embedder, &cleaned, training.embed_batch_size)?;
            if let Some(path) = &settings.paths.embedding_cache {
                lacrime_store::write_embeddings(path, &embeddings)
                    .context("writing embedding cache")?;
            }
            embeddings
        }
    };

    let data = TrainingData::new(embeddings, labels)?;
    Ok((data, histogram))
}

/// Reuse the embedding cache when it exists and lines up with the corpus.
fn cached_embeddings(settings: &Settings, rows: usize) -> anyhow::Result<Option<Vec<Vec<f32>>>> {
    let Some(path) = &settings.paths.embedding_cache else {
        return Ok(None);
    };
    match lacrime_store::read_aligned(path, rows) {
        Ok(embeddings) => {
            eprintln!("  Reusing {} cached embeddings", embeddings.len());
            Ok(Some(embeddings))
        }
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e @ StoreError::CacheMismatch { .. }) => {
            warn!(error = %e, path = %path.display(), "stale embedding cache, re-embedding");
            Ok(None)
        }
        Err(e) => Err(e).context("reading embedding cache"),
    }
}

fn embed_with_progress(
    embedder: &mut dyn TextEmbedder,
    texts: &[String],
    batch_size: usize,
) -> anyhow::Result<Vec<Vec<f32>>> {
    let total = texts.len();
    let mut out = Vec::with_capacity(total);

    for chunk in texts.chunks(PROGRESS_CHUNK) {
        let vecs = embed_all(embedder, chunk, batch_size).context("generating embeddings")?;
        out.extend(vecs);
        eprint!(
            "\r  Embedded {}/{total} ({:.1}%)",
            out.len(),
            out.len() as f64 / total as f64 * 100.0
        );
    }
    eprintln!();

    Ok(out)
}

/// Print what `train` did.
pub fn print_report(stats: &TrainStats, regressor: &SeverityRegressor, settings: &Settings) {
    match stats.source {
        ModelSource::Loaded => {
            println!(
                "Loaded existing regressor from {} (delete it to retrain).",
                settings.paths.artifact.display()
            );
        }
        ModelSource::Trained => {
            println!(
                "Trained regressor in {:.1}s, saved to {}",
                stats.elapsed_secs,
                settings.paths.artifact.display()
            );
            println!();
            println!("Proxy labels");
            for (category, count) in &stats.histogram {
                println!(
                    "  {:<18} {:>2}  {count}",
                    category.as_str(),
                    category.score()
                );
            }
        }
    }

    let report = regressor.report();
    println!();
    println!("Model");
    println!("  {:<18} {}", "trees", regressor.n_trees());
    println!("  {:<18} {}", "dimension", report.dim);
    println!("  {:<18} {}", "seed", report.params.seed);
    println!("  {:<18} {}", "train rows", report.n_train);
    println!("  {:<18} {}", "held-out rows", report.n_test);
    println!(
        "  {:<18} {}",
        "trained at",
        report.trained_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(h) = &report.holdout {
        println!("  {:<18} {:.3}", "MAE", h.mae);
        println!("  {:<18} {:.3}", "RMSE", h.rmse);
        match h.r2 {
            Some(r2) => println!("  {:<18} {:.3}", "R²", r2),
            None => println!("  {:<18} n/a", "R²"),
        }
    }
}
