//! Error types for biome scoring
//!
//! Structural problems with input tables are hard failures raised while the
//! tables are built. Unmapped taxa and empty rows are not errors.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, BiomeError>;

#[derive(Debug, Error)]
pub enum BiomeError {
    /// A required column is missing or carries the wrong header
    #[error("Column {position} must be called \"{expected}\" (found \"{found}\")")]
    MissingColumn {
        /// 1-based column position
        position: usize,
        expected: String,
        found: String,
    },

    /// A relation matrix cell outside {0, 1}
    #[error("Relation between '{key}' and PFT '{pft}' must be 0 or 1, got {value}")]
    InvalidWeight {
        key: String,
        pft: String,
        value: String,
    },

    #[error("Score transform changed the shape from {expected_rows}x{expected_cols} to {rows}x{cols}")]
    ShapeMismatch {
        expected_rows: usize,
        expected_cols: usize,
        rows: usize,
        cols: usize,
    },

    #[error("Cannot convert {from} samples to {to}")]
    UnsupportedConversion {
        from: &'static str,
        to: &'static str,
    },

    #[error("Invalid samples: {0}")]
    InvalidSamples(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Polars(#[from] polars::error::PolarsError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
