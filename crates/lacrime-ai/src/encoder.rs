//! Embedding abstraction shared by training and inference.

/// Sentence encoder producing one fixed-dimension vector per input text.
///
/// Implemented by the ONNX `Embedder` (feature `onnx`); tests plug in
/// lightweight deterministic encoders.
pub trait TextEmbedder {
    /// Embedding dimensionality.
    fn dim(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in input order.
    fn embed_batch(&mut self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    fn embed(&mut self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector"))
    }
}

/// Embed many texts in sub-batches of `batch_size`, preserving order.
pub fn embed_all(
    embedder: &mut dyn TextEmbedder,
    texts: &[String],
    batch_size: usize,
) -> anyhow::Result<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let mut out = Vec::with_capacity(texts.len());

    for chunk in texts.chunks(batch_size) {
        let refs: Vec<&str> = chunk.iter().map(String::as_str).collect();
        let vecs = embedder.embed_batch(&refs)?;
        anyhow::ensure!(
            vecs.len() == refs.len(),
            "embedder returned {} vectors for {} texts",
            vecs.len(),
            refs.len()
        );
        out.extend(vecs);
        tracing::debug!(done = out.len(), total = texts.len(), "embedded batch");
    }

    Ok(out)
}


#[cfg(test)]
mod tests {
    use super::testing::BagOfWords;
    use super::*;

    #[test]
    fn embed_all_preserves_order_across_batches() {
        let texts: Vec<String> = (0..7).map(|i| format!("word{i} shared")).collect();
        let mut enc = BagOfWords { dim: 16 };

        let batched = embed_all(&mut enc, &texts, 3).unwrap();
        assert_eq!(batched.len(), 7);
        for (text, vec) in texts.iter().zip(&batched) {
            assert_eq!(vec, &enc.embed(text).unwrap());
        }
    }

    #[test]
    fn zero_batch_size_is_treated_as_one() {
        let texts = vec!["a".to_string(), "b".to_string()];
        let mut enc = BagOfWords { dim: 4 };
        assert_eq!(embed_all(&mut enc, &texts, 0).unwrap().len(), 2);
    }

    #[test]
    fn embed_all_empty() {
        let mut enc = BagOfWords { dim: 4 };
        assert!(embed_all(&mut enc, &[], 8).unwrap().is_empty());
    }
}
