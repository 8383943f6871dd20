//! Core traits for yieldstat
//!
//! This module defines the dataset-access boundary as a trait so that the
//! estimation engine does not depend on any concrete event backend
//! (in-memory columns, ntuple files, ...).

use crate::error::Result;
use crate::types::{Distribution, ValueWithError};

/// Dataset-access boundary: the sole I/O contract of the engine.
///
/// Implementations must be pure with respect to
/// `(dataset_id, selection, weight, variable, binning)`: the memoization
/// layer assumes that identical queries return identical results.
///
/// Selections and weights are backend-evaluable expression strings; the
/// conventional identity values are `"1"` (no selection) and `"1.0"`
/// (unit weight).
pub trait EventStore: Send + Sync {
    /// Stable identifier of the underlying dataset, used in cache keys.
    fn dataset_id(&self) -> &str;

    /// Sum of the per-event weight over events passing the selection,
    /// with the statistical error of that sum.
    fn sum_weights(&self, selection: &str, weight: &str) -> Result<ValueWithError>;

    /// Weighted distribution of a derived quantity over events passing the
    /// selection. `bin_edges` must be strictly increasing; out-of-range
    /// entries are recorded in the distribution's under/overflow slots.
    fn fill(
        &self,
        variable: &str,
        bin_edges: &[f64],
        selection: &str,
        weight: &str,
    ) -> Result<Distribution>;
}
