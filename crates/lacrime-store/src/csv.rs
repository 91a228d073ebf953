//! CSV loaders for the training corpus and the MOCODE lookup table.
//!
//! Both files are read through arrow-csv with schema inference, then the
//! few columns we need are cast to a known type. Only column presence is
//! validated; everything else about the upstream schema is taken on trust.

use std::fs::File;
use std::io::Seek;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Int64Array, StringArray};
use arrow::compute::cast;
use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use lacrime_core::MocodeTable;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

use crate::StoreError;

pub const MOCODE_COLUMN: &str = "mocode";
pub const DESCRIPTION_COLUMN: &str = "description";

/// Read a headed CSV file into Arrow record batches, inferring the schema
/// from every row.
pub fn read_csv(path: &Path) -> Result<Vec<RecordBatch>, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    let mut file = File::open(path)?;
    let format = Format::default().with_header(true);
    let (schema, _) = format.infer_schema(&mut file, None)?;
    file.rewind()?;

    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_format(format)
        .build(file)?;
    let batches: Result<Vec<RecordBatch>, _> = reader.collect();
    Ok(batches?)
}

/// Row sampling applied to the corpus before training.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub size: usize,
    pub seed: u64,
}

/// Load the narrative column of the training corpus.
///
/// Null cells become empty strings so row alignment with any embedding
/// cache is preserved. With a [`Sample`], `size` rows are drawn without
/// replacement using a seeded RNG; a sample at least as large as the corpus
/// keeps every row in file order.
pub fn load_training_corpus(
    path: &Path,
    text_column: &str,
    sample: Option<Sample>,
) -> Result<Vec<String>, StoreError> {
    let batches = read_csv(path)?;

    let mut texts = Vec::new();
    for batch in &batches {
        let col = utf8_column(batch, text_column, path)?;
        for row in 0..col.len() {
            if col.is_null(row) {
                texts.push(String::new());
            } else {
                texts.push(col.value(row).to_string());
            }
        }
    }
    let total = texts.len();

    let texts = match sample {
        Some(s) if s.size < total => {
            let mut rng = StdRng::seed_from_u64(s.seed);
            let picked = rand::seq::index::sample(&mut rng, total, s.size);
            picked.iter().map(|i| std::mem::take(&mut texts[i])).collect()
        }
        _ => texts,
    };

    info!(
        path = %path.display(),
        total,
        used = texts.len(),
        "loaded training corpus"
    );
    Ok(texts)
}

/// Load the MOCODE table from a CSV with `mocode` and `description` columns.
///
/// Codes are read as integers (floats are truncated) and zero-padded to four
/// digits. Rows with a null code or description are skipped.
pub fn load_mocode_table(path: &Path) -> Result<MocodeTable, StoreError> {
    let batches = read_csv(path)?;

    let mut table = MocodeTable::new();
    for batch in &batches {
        let codes = int_column(batch, MOCODE_COLUMN, path)?;
        let descriptions = utf8_column(batch, DESCRIPTION_COLUMN, path)?;

        for row in 0..batch.num_rows() {
            if codes.is_null(row) || descriptions.is_null(row) {
                continue;
            }
            table.insert(&codes.value(row).to_string(), descriptions.value(row));
        }
    }

    info!(path = %path.display(), entries = table.len(), "loaded MOCODE table");
    Ok(table)
}

// ── Arrow extraction helpers ──

fn column(batch: &RecordBatch, name: &str, path: &Path) -> Result<ArrayRef, StoreError> {
    batch
        .column_by_name(name)
        .cloned()
        .ok_or_else(|| StoreError::MissingColumn {
            column: name.to_string(),
            path: path.to_path_buf(),
        })
}

/// Fetch a column cast to `Utf8`, whatever type inference picked for it.
fn utf8_column(batch: &RecordBatch, name: &str, path: &Path) -> Result<StringArray, StoreError> {
    let casted = cast(&column(batch, name, path)?, &DataType::Utf8)?;
    casted
        .as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .ok_or_else(|| StoreError::Other(format!("'{name}' column is not Utf8 after cast")))
}

fn int_column(batch: &RecordBatch, name: &str, path: &Path) -> Result<Int64Array, StoreError> {
    let casted = cast(&column(batch, name, path)?, &DataType::Int64)?;
    casted
        .as_any()
        .downcast_ref::<Int64Array>()
        .cloned()
        .ok_or_else(|| StoreError::Other(format!("'{name}' column is not Int64 after cast")))
}
