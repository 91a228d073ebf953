//! Precomputed corpus embeddings stored as an Arrow IPC file.
//!
//! One `embedding` column of `FixedSizeList<Float32, dim>`, one row per
//! corpus row, in corpus order. Alignment is by position only, so a cache
//! is reused only when its row count matches the corpus being trained on.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, FixedSizeListArray, FixedSizeListBuilder, Float32Array, Float32Builder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use tracing::info;

use crate::StoreError;

const EMBEDDING_COLUMN: &str = "embedding";

/// Write embeddings to `path`, replacing any existing file.
pub fn write_embeddings(path: &Path, embeddings: &[Vec<f32>]) -> Result<(), StoreError> {
    let dim = embeddings.first().map(|v| v.len()).unwrap_or(0);
    if let Some(bad) = embeddings.iter().position(|v| v.len() != dim) {
        return Err(StoreError::Other(format!(
            "embedding {bad} has dimension {}, expected {dim}",
            embeddings[bad].len()
        )));
    }

    let schema = Arc::new(Schema::new(vec![Field::new(
        EMBEDDING_COLUMN,
        DataType::FixedSizeList(
            Arc::new(Field::new("item", DataType::Float32, true)),
            dim as i32,
        ),
        false,
    )]));

    let mut builder = FixedSizeListBuilder::new(Float32Builder::new(), dim as i32);
    for emb in embeddings {
        builder.values().append_slice(emb);
        builder.append(true);
    }
    let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(builder.finish())])?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut writer = FileWriter::try_new(file, &schema)?;
    writer.write(&batch)?;
    writer.finish()?;

    info!(path = %path.display(), rows = embeddings.len(), dim, "wrote embedding cache");
    Ok(())
}

/// Read every embedding from a cache file, in row order.
pub fn read_embeddings(path: &Path) -> Result<Vec<Vec<f32>>, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    let reader = FileReader::try_new(File::open(path)?, None)?;

    let mut out = Vec::new();
    for batch in reader {
        let batch = batch?;
        let col = batch
            .column_by_name(EMBEDDING_COLUMN)
            .ok_or_else(|| StoreError::MissingColumn {
                column: EMBEDDING_COLUMN.to_string(),
                path: path.to_path_buf(),
            })?;
        let fsl = col
            .as_any()
            .downcast_ref::<FixedSizeListArray>()
            .ok_or_else(|| StoreError::Other("embedding column is not FixedSizeList".into()))?;
        let dim = fsl.value_length() as usize;
        let flat = fsl
            .values()
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| StoreError::Other("embedding values are not Float32".into()))?;

        for row in 0..fsl.len() {
            let offset = (fsl.offset() + row) * dim;
            out.push(flat.values()[offset..offset + dim].to_vec());
        }
    }

    info!(path = %path.display(), rows = out.len(), "read embedding cache");
    Ok(out)
}

/// Read a cache and check it lines up with `expected_rows` corpus rows.
pub fn read_aligned(path: &Path, expected_rows: usize) -> Result<Vec<Vec<f32>>, StoreError> {
    let embeddings = read_embeddings(path)?;
    if embeddings.len() != expected_rows {
        return Err(StoreError::CacheMismatch {
            expected: expected_rows,
            found: embeddings.len(),
        });
    }
    Ok(embeddings)
}
