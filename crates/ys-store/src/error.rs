//! Error types for the columnar event store.

use thiserror::Error;

/// Store-level error type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Malformed selection/weight/variable expression.
    #[error("expression error: {0}")]
    Expression(String),

    /// An expression references a column the store does not hold.
    #[error("missing column: '{0}'")]
    MissingColumn(String),

    /// Columns referenced by one query have inconsistent lengths.
    #[error("column length mismatch: '{name}' has {got} rows, expected {expected}")]
    ColumnLength {
        /// Offending column name.
        name: String,
        /// Rows found in the column.
        got: usize,
        /// Rows expected from the first column read.
        expected: usize,
    },

    /// Bin edges are empty or not strictly increasing.
    #[error("invalid bin edges: {0}")]
    Binning(String),
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<StoreError> for ys_core::Error {
    fn from(e: StoreError) -> Self {
        ys_core::Error::Aggregation(e.to_string())
    }
}
