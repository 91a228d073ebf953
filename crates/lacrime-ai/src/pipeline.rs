//! End-to-end severity scoring for a single crime profile.
//!
//! ```text
//! CrimeProfile ─► narrative ─► normalize ─► embed ─► regressor ─► LLM refine
//!                     └────────────────────────────────────────────┘
//! ```
//!
//! The refiner sees the original narrative; the embedder sees the
//! normalized form, matching how the corpus was prepared for training.

use anyhow::Context;
use lacrime_core::{CrimeProfile, MocodeTable, compose_narrative, normalize};
use serde::Serialize;
use tracing::info;

use crate::encoder::TextEmbedder;
use crate::refiner::Refiner;
use crate::regressor::SeverityRegressor;

/// Result of scoring one profile.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    /// Refined score, or the rounded model score when refinement degraded.
    pub final_score: f64,
    /// Zero or more preventive tips (three when refinement succeeds).
    pub tips: Vec<String>,
    pub narrative: String,
    /// Raw regressor output, unclipped.
    pub model_score: f64,
    pub refined: bool,
}

/// Everything needed to score profiles, loaded once at start-up.
pub struct SeverityContext {
    embedder: Box<dyn TextEmbedder + Send>,
    regressor: SeverityRegressor,
    mocodes: MocodeTable,
    refiner: Refiner,
}

impl SeverityContext {
    /// Assemble a context. Fails if the embedder and regressor disagree on
    /// the embedding dimension.
    pub fn new(
        embedder: Box<dyn TextEmbedder + Send>,
        regressor: SeverityRegressor,
        mocodes: MocodeTable,
        refiner: Refiner,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            embedder.dim() == regressor.dim(),
            "embedder produces {}-dim vectors but the regressor expects {}",
            embedder.dim(),
            regressor.dim()
        );
        Ok(Self {
            embedder,
            regressor,
            mocodes,
            refiner,
        })
    }

    /// Score a profile: compose its narrative, predict a raw score, then
    /// let the LLM refine it and suggest tips.
    ///
    /// Embedding and regression faults are errors. Refinement never is.
    pub async fn predict_severity(&mut self, profile: &CrimeProfile) -> anyhow::Result<Prediction> {
        let narrative = compose_narrative(profile, &self.mocodes);
        let cleaned = normalize(&narrative);

        let embedding = self
            .embedder
            .embed(&cleaned)
            .context("embedding narrative")?;
        let model_score = self
            .regressor
            .predict(&embedding)
            .context("predicting severity")?;
        info!(model_score, "model severity");

        let refinement = self.refiner.refine(&narrative, model_score).await;

        Ok(Prediction {
            final_score: refinement.final_score,
            tips: refinement.tips,
            narrative,
            model_score,
            refined: refinement.refined,
        })
    }
}
