//! Tree-ensemble severity regressor over narrative embeddings.
//!
//! A bagged ensemble of regression trees (a random forest using every
//! feature at each split) maps an embedding to a continuous severity
//! estimate. Trees are fitted in parallel, each on its own bootstrap resample
//! drawn from a seed derived from the forest seed, so a given corpus and
//! seed always produce the same forest.
//!
//! The fitted forest is persisted once and then acts as a cache keyed by
//! its file path: [`load_or_train`] never refits while the artifact exists,
//! even if the training data has changed since.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};
use thiserror::Error;
use tracing::info;

/// Bumped whenever the serialized layout of [`SeverityRegressor`] changes.
const ARTIFACT_VERSION: u32 = 1;

type Tree = DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

#[derive(Error, Debug)]
pub enum RegressorError {
    #[error("training data is empty")]
    Empty,
    #[error("{features} feature rows but {labels} labels")]
    LengthMismatch { features: usize, labels: usize },
    #[error("embedding has dimension {found}, expected {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("tree fit failed: {0}")]
    Fit(String),
    #[error("prediction failed: {0}")]
    Predict(String),
    #[error("artifact version {found} is not supported (expected {ARTIFACT_VERSION})")]
    Version { found: u32 },
    #[error("artifact io: {0}")]
    Io(#[from] std::io::Error),
    #[error("artifact encoding: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Embeddings paired with their proxy severity labels.
pub struct TrainingData {
    features: Vec<Vec<f32>>,
    labels: Vec<f64>,
    dim: usize,
}

impl TrainingData {
    /// Validate and pair features with labels. All rows must share one dimension.
    pub fn new(features: Vec<Vec<f32>>, labels: Vec<f64>) -> Result<Self, RegressorError> {
        if features.is_empty() {
            return Err(RegressorError::Empty);
        }
        if features.len() != labels.len() {
            return Err(RegressorError::LengthMismatch {
                features: features.len(),
                labels: labels.len(),
            });
        }
        let dim = features[0].len();
        if dim == 0 {
            return Err(RegressorError::Empty);
        }
        if let Some(bad) = features.iter().find(|f| f.len() != dim) {
            return Err(RegressorError::DimensionMismatch {
                expected: dim,
                found: bad.len(),
            });
        }
        Ok(Self {
            features,
            labels,
            dim,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

/// Forest hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub seed: u64,
    /// Share of rows held out from fitting for evaluation.
    pub test_fraction: f64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            seed: 42,
            test_fraction: 0.2,
        }
    }
}

/// Error metrics on the held-out split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldoutMetrics {
    pub mae: f64,
    pub rmse: f64,
    /// Undefined when the held-out labels are all equal.
    pub r2: Option<f64>,
}

/// What a fit did, stored alongside the trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainReport {
    pub params: ForestParams,
    pub n_train: usize,
    pub n_test: usize,
    pub dim: usize,
    pub trained_at: DateTime<Utc>,
    pub holdout: Option<HoldoutMetrics>,
}

/// Fitted severity regressor.
#[derive(Serialize, Deserialize)]
pub struct SeverityRegressor {
    version: u32,
    trees: Vec<Tree>,
    report: TrainReport,
}

impl SeverityRegressor {
    /// Fit a forest on `data`: seeded 80/20 split, parallel bagged trees,
    /// then evaluation on the held-out rows.
    pub fn fit(data: &TrainingData, params: &ForestParams) -> Result<Self, RegressorError> {
        if data.is_empty() || params.n_trees == 0 {
            return Err(RegressorError::Empty);
        }

        let (train_idx, test_idx) = split_indices(data.len(), params.test_fraction, params.seed);
        if train_idx.is_empty() {
            return Err(RegressorError::Empty);
        }

        info!(
            n_trees = params.n_trees,
            n_train = train_idx.len(),
            n_test = test_idx.len(),
            dim = data.dim,
            "fitting severity forest"
        );

        let trees: Vec<Tree> = (0..params.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(t as u64 + 1));
                let bootstrap: Vec<usize> = (0..train_idx.len())
                    .map(|_| train_idx[rng.gen_range(0..train_idx.len())])
                    .collect();
                fit_tree(data, &bootstrap)
            })
            .collect::<Result<_, _>>()?;

        let mut model = Self {
            version: ARTIFACT_VERSION,
            trees,
            report: TrainReport {
                params: params.clone(),
                n_train: train_idx.len(),
                n_test: test_idx.len(),
                dim: data.dim,
                trained_at: Utc::now(),
                holdout: None,
            },
        };

        if !test_idx.is_empty() {
            let test_x: Vec<&[f32]> = test_idx.iter().map(|&i| data.features[i].as_slice()).collect();
            let test_y: Vec<f64> = test_idx.iter().map(|&i| data.labels[i]).collect();
            let predicted = model.predict_rows(&test_x)?;
            let metrics = holdout_metrics(&test_y, &predicted);
            info!(
                mae = metrics.mae,
                rmse = metrics.rmse,
                r2 = ?metrics.r2,
                "held-out evaluation"
            );
            model.report.holdout = Some(metrics);
        }

        Ok(model)
    }

    /// Predict the severity of one embedding. The result is not clipped.
    pub fn predict(&self, embedding: &[f32]) -> Result<f64, RegressorError> {
        let scores = self.predict_rows(&[embedding])?;
        Ok(scores[0])
    }

    fn predict_rows(&self, rows: &[&[f32]]) -> Result<Vec<f64>, RegressorError> {
        if rows.is_empty() {
            return Ok(vec![]);
        }
        let dim = self.report.dim;
        if let Some(bad) = rows.iter().find(|r| r.len() != dim) {
            return Err(RegressorError::DimensionMismatch {
                expected: dim,
                found: bad.len(),
            });
        }

        let values: Vec<f64> = rows
            .iter()
            .flat_map(|r| r.iter().map(|&v| v as f64))
            .collect();
        let x = DenseMatrix::new(rows.len(), dim, values, false);

        let mut sums = vec![0.0f64; rows.len()];
        for tree in &self.trees {
            let predicted = tree
                .predict(&x)
                .map_err(|e| RegressorError::Predict(e.to_string()))?;
            for (s, p) in sums.iter_mut().zip(predicted) {
                *s += p;
            }
        }

        let n = self.trees.len() as f64;
        Ok(sums.into_iter().map(|s| s / n).collect())
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn dim(&self) -> usize {
        self.report.dim
    }

    pub fn report(&self) -> &TrainReport {
        &self.report
    }

    /// Serialize to `path`, creating parent directories.
    ///
    /// The artifact is written to a sibling `.partial` file, synced, then
    /// renamed into place, so `path` only ever holds a complete forest.
    pub fn save(&self, path: &Path) -> Result<(), RegressorError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let partial = partial_path(path);

        let written = File::create(&partial)
            .map_err(RegressorError::from)
            .and_then(|file| self.write_artifact(file))
            .and_then(|file| Ok(file.sync_all()?));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }
        std::fs::rename(&partial, path)?;

        info!(path = %path.display(), n_trees = self.trees.len(), "saved severity regressor");
        Ok(())
    }

    /// Encode into `sink` and flush, handing the sink back.
    fn write_artifact<W: Write>(&self, sink: W) -> Result<W, RegressorError> {
        let mut writer = BufWriter::new(sink);
        bincode::serialize_into(&mut writer, self)?;
        writer
            .into_inner()
            .map_err(|e| RegressorError::Io(e.into_error()))
    }

    /// Deserialize from `path`. A corrupt or foreign file is an error, never
    /// a reason to retrain.
    pub fn load(path: &Path) -> Result<Self, RegressorError> {
        let reader = BufReader::new(File::open(path)?);
        let model: Self = bincode::deserialize_from(reader)?;
        if model.version != ARTIFACT_VERSION {
            return Err(RegressorError::Version {
                found: model.version,
            });
        }
        info!(
            path = %path.display(),
            n_trees = model.trees.len(),
            dim = model.report.dim,
            "loaded severity regressor"
        );
        Ok(model)
    }
}

/// How [`load_or_train`] obtained its regressor.
#[derive(Debug)]
pub enum ModelSource {
    /// Deserialized from an existing artifact; no training happened.
    Loaded,
    /// Fitted now and written to the artifact path.
    Trained,
}

/// Load the regressor at `artifact_path`, or fit and persist one.
///
/// `training_data` is only called when no artifact exists, so the corpus
/// is never read (or embedded) on the load path. Whatever it would return,
/// an existing artifact is used unchanged.
pub fn load_or_train<F>(
    artifact_path: &Path,
    params: &ForestParams,
    training_data: F,
) -> anyhow::Result<(SeverityRegressor, ModelSource)>
where
    F: FnOnce() -> anyhow::Result<TrainingData>,
{
    if artifact_path.exists() {
        let model = SeverityRegressor::load(artifact_path)?;
        return Ok((model, ModelSource::Loaded));
    }

    info!(path = %artifact_path.display(), "no regressor artifact, training");
    let data = training_data()?;
    let model = SeverityRegressor::fit(&data, params)?;
    model.save(artifact_path)?;
    Ok((model, ModelSource::Trained))
}

// ── Helpers ──

fn partial_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

/// Shuffle `0..n` with a seeded RNG and cut off the test share (rounded up).
fn split_indices(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut idx: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    idx.shuffle(&mut rng);

    let fraction = test_fraction.clamp(0.0, 1.0);
    let n_test = ((n as f64) * fraction).ceil() as usize;
    let n_test = n_test.min(n.saturating_sub(1));
    let test = idx.split_off(n - n_test);
    (idx, test)
}

fn fit_tree(data: &TrainingData, rows: &[usize]) -> Result<Tree, RegressorError> {
    let values: Vec<f64> = rows
        .iter()
        .flat_map(|&i| data.features[i].iter().map(|&v| v as f64))
        .collect();
    let x = DenseMatrix::new(rows.len(), data.dim, values, false);
    let y: Vec<f64> = rows.iter().map(|&i| data.labels[i]).collect();

    DecisionTreeRegressor::fit(&x, &y, DecisionTreeRegressorParameters::default())
        .map_err(|e| RegressorError::Fit(e.to_string()))
}

fn holdout_metrics(actual: &[f64], predicted: &[f64]) -> HoldoutMetrics {
    let n = actual.len() as f64;
    let mae = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / n;
    let ss_res: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).powi(2)).sum();
    let rmse = (ss_res / n).sqrt();

    let mean = actual.iter().sum::<f64>() / n;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    let r2 = (ss_tot > 0.0).then(|| 1.0 - ss_res / ss_tot);

    HoldoutMetrics { mae, rmse, r2 }
}
