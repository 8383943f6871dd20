//! Error types for yieldstat

use thiserror::Error;

/// yieldstat error type
#[derive(Error, Debug)]
pub enum Error {
    /// A named selection, variable, process, dataset, or systematic is not
    /// registered. Non-recoverable for the request; never poisons the cache.
    #[error("unknown {kind}: '{name}'")]
    Resolution {
        /// Kind of the missing entity ("selection", "variable", ...).
        kind: &'static str,
        /// The key that could not be resolved.
        name: String,
    },

    /// The dataset-access collaborator could not complete a query
    /// (e.g. malformed expression, missing column).
    #[error("aggregation failed: {0}")]
    Aggregation(String),

    /// Shape or configuration mismatch (incompatible binnings, empty
    /// rosters, malformed bin edges).
    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Shorthand for a [`Error::Resolution`] value.
    pub fn resolution(kind: &'static str, name: impl Into<String>) -> Self {
        Error::Resolution { kind, name: name.into() }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
