//! # ys-store
//!
//! In-memory columnar event store for yieldstat.
//!
//! Implements the [`ys_core::EventStore`] dataset-access contract over
//! named `f64` columns, with selections, weights, and variables given as
//! compiled string expressions.
//!
//! ## Example
//!
//! ```
//! use ys_core::EventStore;
//! use ys_store::ColumnStore;
//!
//! let store = ColumnStore::new("mc16_ttbar")
//!     .with_column("pt", vec![30.0, 55.0, 80.0])
//!     .with_column("weight_mc", vec![0.9, 1.1, 1.0]);
//!
//! let n = store.sum_weights("pt > 40.0", "weight_mc").unwrap();
//! assert!((n.value - 2.1).abs() < 1e-9);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod columns;
pub mod error;
pub mod expr;

pub use columns::{ColumnStore, NO_SELECTION, UNIT_WEIGHT};
pub use error::{Result, StoreError};
pub use expr::Formula;
