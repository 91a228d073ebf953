//! ONNX Runtime sentence embeddings for crime narratives.
//!
//! Mean-pooled, L2-normalised embeddings from a sentence-transformers export
//! (all-mpnet-base-v2 by default, 768 dimensions). The model directory must
//! contain `model.onnx` and `tokenizer.json`.

use std::path::Path;

use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Encoding, PaddingParams, Tokenizer, TruncationParams};
use tracing::info;

use crate::encoder::TextEmbedder;

/// MPNet was trained on inputs of at most 384 tokens.
const MAX_TOKENS: usize = 384;

/// Used when the model leaves its hidden size symbolic.
const FALLBACK_DIM: usize = 768;

/// Frozen sentence encoder backed by ONNX Runtime.
pub struct Embedder {
    session: Session,
    tokenizer: Tokenizer,
    dim: usize,
    /// BERT-style exports take `token_type_ids`; MPNet exports do not.
    wants_token_types: bool,
}

/// Padded `[batch, seq_len]` model inputs, row-major.
struct BatchInputs {
    seq_len: usize,
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
    token_type_ids: Vec<i64>,
}

impl BatchInputs {
    fn from_encodings(encodings: &[Encoding]) -> Self {
        let seq_len = encodings.iter().map(|e| e.len()).max().unwrap_or(0);
        let cells = encodings.len() * seq_len;
        let mut inputs = Self {
            seq_len,
            input_ids: vec![0; cells],
            attention_mask: vec![0; cells],
            token_type_ids: vec![0; cells],
        };

        for (row, enc) in encodings.iter().enumerate() {
            let start = row * seq_len;
            let fill = |dst: &mut [i64], src: &[u32]| {
                for (d, &s) in dst.iter_mut().zip(src) {
                    *d = s as i64;
                }
            };
            fill(&mut inputs.input_ids[start..start + seq_len], enc.get_ids());
            fill(&mut inputs.attention_mask[start..start + seq_len], enc.get_attention_mask());
            fill(&mut inputs.token_type_ids[start..start + seq_len], enc.get_type_ids());
        }
        inputs
    }

    fn shape(&self) -> [i64; 2] {
        let rows = self.input_ids.len().checked_div(self.seq_len).unwrap_or(0);
        [rows as i64, self.seq_len as i64]
    }
}

impl Embedder {
    /// Load the model and tokenizer from `model_dir`.
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");
        for required in [&model_path, &tokenizer_path] {
            anyhow::ensure!(required.exists(), "{} not found", required.display());
        }

        let session = Session::builder()?.commit_from_file(&model_path)?;
        let dim = hidden_size(session.outputs()[0].dtype()).unwrap_or(FALLBACK_DIM);
        let wants_token_types = session
            .inputs()
            .iter()
            .any(|input| input.name() == "token_type_ids");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("set truncation: {e}"))?;
        // Pad to the longest narrative in each batch.
        tokenizer.with_padding(Some(PaddingParams::default()));

        info!(
            dim,
            wants_token_types,
            model = %model_path.display(),
            "loaded sentence embedder"
        );
        Ok(Self {
            session,
            tokenizer,
            dim,
            wants_token_types,
        })
    }

    /// Run the model, returning flat `[batch, seq, dim]` token states and the
    /// sequence length the model reports.
    fn token_states(&mut self, inputs: BatchInputs) -> anyhow::Result<(Vec<f32>, usize)> {
        let shape = inputs.shape();
        let ids = Tensor::from_array((shape, inputs.input_ids.into_boxed_slice()))?;
        let mask = Tensor::from_array((shape, inputs.attention_mask.into_boxed_slice()))?;

        let outputs = if self.wants_token_types {
            let types = Tensor::from_array((shape, inputs.token_type_ids.into_boxed_slice()))?;
            self.session.run(ort::inputs![
                "input_ids" => ids,
                "attention_mask" => mask,
                "token_type_ids" => types,
            ])?
        } else {
            self.session.run(ort::inputs![
                "input_ids" => ids,
                "attention_mask" => mask,
            ])?
        };

        let (out_shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: &[i64] = out_shape;
        anyhow::ensure!(
            dims.len() == 3 && dims[0] == shape[0] && dims[2] as usize == self.dim,
            "model returned shape {dims:?}, expected [{}, _, {}]",
            shape[0],
            self.dim
        );
        Ok((data.to_vec(), dims[1] as usize))
    }
}

impl TextEmbedder for Embedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&mut self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenize: {e}"))?;
        let inputs = BatchInputs::from_encodings(&encodings);
        let seq_len = inputs.seq_len;
        let mask = inputs.attention_mask.clone();

        let (states, out_seq_len) = self.token_states(inputs)?;
        let row_width = out_seq_len * self.dim;

        Ok((0..texts.len())
            .map(|row| {
                let row_mask = &mask[row * seq_len..(row + 1) * seq_len];
                let row_states = &states[row * row_width..(row + 1) * row_width];
                let mut pooled = mean_pool(row_states, row_mask, self.dim);
                l2_normalize(&mut pooled);
                pooled
            })
            .collect())
    }
}

/// Average the token vectors whose mask is set. `states` holds one row of
/// `dim` values per token; tokens beyond the mask length are ignored.
fn mean_pool(states: &[f32], mask: &[i64], dim: usize) -> Vec<f32> {
    let mut pooled = vec![0.0f32; dim];
    let mut kept = 0usize;

    for (token, _) in states.chunks_exact(dim).zip(mask).filter(|(_, m)| **m > 0) {
        for (p, v) in pooled.iter_mut().zip(token) {
            *p += v;
        }
        kept += 1;
    }

    if kept > 0 {
        let n = kept as f32;
        pooled.iter_mut().for_each(|p| *p /= n);
    }
    pooled
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Hidden size from the output's declared shape, if it is concrete.
fn hidden_size(output_type: &ort::value::ValueType) -> Option<usize> {
    match output_type {
        ort::value::ValueType::Tensor { shape, .. } => {
            shape.last().copied().filter(|&d| d > 0).map(|d| d as usize)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn pooling_skips_masked_tokens() {
        // Three tokens of dim 2; the padding token must not count.
        let states = [1.0, 2.0, 3.0, 4.0, 100.0, 100.0];
        assert_eq!(mean_pool(&states, &[1, 1, 0], 2), vec![2.0, 3.0]);
    }

    #[test]
    fn pooling_all_masked_is_zero() {
        assert_eq!(mean_pool(&[5.0, 5.0], &[0], 2), vec![0.0, 0.0]);
    }

    #[test]
    fn normalizes_to_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.6, 0.8]);

        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    /// `LACRIME_MODEL_DIR`, or `models/all-mpnet-base-v2` at the workspace root.
    fn load_model() -> Embedder {
        let dir = std::env::var_os("LACRIME_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                Path::new(env!("CARGO_MANIFEST_DIR")).join("../../models/all-mpnet-base-v2")
            });
        Embedder::load(&dir).unwrap_or_else(|e| panic!("no embedding model at {dir:?}: {e}"))
    }

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    #[ignore = "requires an exported all-mpnet-base-v2"]
    fn narratives_embed_to_unit_vectors() {
        let mut embedder = load_model();
        let vecs = embedder
            .embed_batch(&[
                "the victim was an adult individual age identified as male",
                "a burglary occurred at a residence during the night hours",
            ])
            .unwrap();

        assert_eq!(vecs.len(), 2);
        for v in &vecs {
            assert_eq!(v.len(), embedder.dim());
            assert!((dot(v, v).sqrt() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    #[ignore = "requires an exported all-mpnet-base-v2"]
    fn padding_does_not_change_embeddings() {
        let mut embedder = load_model();
        let short = "robbery at a bank";
        let long = "identity theft reported online after a phishing call to the victim";
        let batch = embedder.embed_batch(&[short, long]).unwrap();
        let alone = embedder.embed(short).unwrap();
        assert!(dot(&alone, &batch[0]) > 0.999);
    }

    #[test]
    #[ignore = "requires an exported all-mpnet-base-v2"]
    fn related_crimes_are_closer() {
        let mut embedder = load_model();
        let burglary = embedder.embed("burglary at a residence").unwrap();
        let break_in = embedder.embed("house break in and property stolen").unwrap();
        let fraud = embedder.embed("credit card fraud online").unwrap();
        assert!(dot(&burglary, &break_in) > dot(&burglary, &fraud));
    }
}
