//! Storage layer: CSV corpus and MOCODE loaders, Arrow IPC embedding cache.

pub mod cache;
pub mod csv;
mod error;

pub use cache::{read_aligned, read_embeddings, write_embeddings};
pub use csv::{Sample, load_mocode_table, load_training_corpus, read_csv};
pub use error::StoreError;
