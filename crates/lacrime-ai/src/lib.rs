//! Severity inference: ONNX Runtime for embeddings, a tree ensemble for the
//! raw score, and an LLM for refinement and safety tips.

#[cfg(feature = "onnx")]
mod embedder;
#[cfg(feature = "onnx")]
pub use embedder::Embedder;

pub mod encoder;
pub mod pipeline;
pub mod refiner;
pub mod regressor;

pub use encoder::{TextEmbedder, embed_all};
pub use pipeline::{Prediction, SeverityContext};
pub use refiner::{Refinement, Refiner};
pub use regressor::{ForestParams, ModelSource, SeverityRegressor, TrainingData, load_or_train};
