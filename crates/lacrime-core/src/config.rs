//! Shared configuration for training and inference.
//!
//! Every field has a default, so an empty (or absent) TOML file is a valid
//! configuration. The CLI layers flag and environment overrides on top.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::CoreError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub training: TrainingSettings,
    pub llm: LlmSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Persisted regressor. If this file exists, training is skipped.
    pub artifact: PathBuf,
    /// Training corpus CSV with one narrative per row.
    pub corpus: PathBuf,
    /// MOCODE lookup CSV (`mocode`, `description`).
    pub mocodes: PathBuf,
    /// Optional precomputed corpus embeddings (Arrow IPC).
    pub embedding_cache: Option<PathBuf>,
    /// Directory holding `model.onnx` and `tokenizer.json`.
    pub model_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// Narrative column in the corpus CSV.
    pub text_column: String,
    /// Rows sampled from the corpus before training; `None` uses every row.
    pub sample: Option<usize>,
    pub n_trees: usize,
    pub seed: u64,
    /// Share of rows held out for evaluation.
    pub test_fraction: f64,
    pub embed_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// OpenAI-compatible chat completions URL.
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Retries after the first attempt, transient failures only.
    pub max_retries: u32,
    /// Bearer token. Without one, refinement is skipped.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            artifact: PathBuf::from("severity_regressor.bin"),
            corpus: PathBuf::from("crimeProfileText_data.csv"),
            mocodes: PathBuf::from("mocode_data.csv"),
            embedding_cache: None,
            model_dir: PathBuf::from("models/all-mpnet-base-v2"),
        }
    }
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            text_column: "Crime_Profile_Text".to_string(),
            sample: Some(3000),
            n_trees: 100,
            seed: 42,
            test_fraction: 0.2,
            embed_batch_size: 64,
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            temperature: 0.5,
            timeout_secs: 30,
            max_retries: 1,
            api_key: None,
        }
    }
}

impl Settings {
    /// Parse settings from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, CoreError> {
        Ok(toml::from_str(text)?)
    }

    /// Load settings from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_toml(&text)?;
        tracing::info!(path = %path.display(), "loaded config");
        Ok(settings)
    }
}
