//! # ys-core
//!
//! Core types for the yieldstat histogram/background-estimation engine:
//! the error taxonomy, scalar yields with uncertainty, weighted
//! distributions, and the [`EventStore`] dataset-access boundary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::EventStore;
pub use types::{Distribution, ValueWithError};

/// Crate version (for artifact metadata).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
