use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file not found: {0}")]
    NotFound(std::path::PathBuf),

    #[error("missing '{column}' column in {path}")]
    MissingColumn {
        column: String,
        path: std::path::PathBuf,
    },

    #[error("embedding cache has {found} rows, expected {expected}")]
    CacheMismatch { expected: usize, found: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("{0}")]
    Other(String),
}
