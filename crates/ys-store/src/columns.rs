//! In-memory columnar event store.
//!
//! The reference implementation of the [`EventStore`] dataset-access
//! contract: events are rows across equal-length `f64` columns, and
//! selections/weights/variables are [`Formula`] expressions over column
//! names.

use std::collections::HashMap;

use ys_core::{Distribution, EventStore, ValueWithError};

use crate::error::{Result, StoreError};
use crate::expr::Formula;

/// Expression string meaning "no selection".
pub const NO_SELECTION: &str = "1";
/// Expression string meaning "unit weight".
pub const UNIT_WEIGHT: &str = "1.0";

/// An event sample held as named `f64` columns of equal length.
#[derive(Debug, Clone, Default)]
pub struct ColumnStore {
    id: String,
    columns: HashMap<String, Vec<f64>>,
}

impl ColumnStore {
    /// Create an empty store with the given dataset identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), columns: HashMap::new() }
    }

    /// Add a column (builder style).
    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.columns.insert(name.into(), values);
        self
    }

    /// Number of rows, taken from any column (0 when the store is empty).
    pub fn n_rows(&self) -> usize {
        self.columns.values().next().map(|v| v.len()).unwrap_or(0)
    }

    /// Resolve the columns a formula needs, checking existence and length.
    fn gather<'a>(&'a self, formula: &Formula) -> Result<Vec<&'a [f64]>> {
        let expected = self.n_rows();
        formula
            .columns
            .iter()
            .map(|name| {
                let col = self
                    .columns
                    .get(name)
                    .ok_or_else(|| StoreError::MissingColumn(name.clone()))?;
                if col.len() != expected {
                    return Err(StoreError::ColumnLength {
                        name: name.clone(),
                        got: col.len(),
                        expected,
                    });
                }
                Ok(col.as_slice())
            })
            .collect()
    }

    /// Evaluate a formula for every row (constant formulas are broadcast).
    fn evaluate(&self, formula: &Formula) -> Result<Vec<f64>> {
        if formula.is_constant() {
            let value = formula.eval_row(&[]);
            return Ok(vec![value; self.n_rows()]);
        }
        let cols = self.gather(formula)?;
        Ok(formula.eval_bulk(&cols))
    }

    /// Sum of `weight` over rows passing `selection`, with the statistical
    /// error of the sum (sqrt of the sum of squared weights).
    pub fn weighted_sum(&self, selection: &str, weight: &str) -> Result<ValueWithError> {
        let sel = self.evaluate(&Formula::compile(selection)?)?;
        let wgt = self.evaluate(&Formula::compile(weight)?)?;

        let mut sum = 0.0;
        let mut sumw2 = 0.0;
        for (s, w) in sel.iter().zip(&wgt) {
            if *s > 0.0 {
                sum += w;
                sumw2 += w * w;
            }
        }
        Ok(ValueWithError::new(sum, sumw2.sqrt()))
    }

    /// Fill a weighted distribution of `variable` over rows passing
    /// `selection`. Out-of-range rows land in the under/overflow slots.
    pub fn fill_distribution(
        &self,
        variable: &str,
        bin_edges: &[f64],
        selection: &str,
        weight: &str,
    ) -> Result<Distribution> {
        if bin_edges.len() < 2 {
            return Err(StoreError::Binning(format!(
                "need at least 2 edges, got {}",
                bin_edges.len()
            )));
        }
        if bin_edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(StoreError::Binning("edges must be strictly increasing".into()));
        }

        let var = self.evaluate(&Formula::compile(variable)?)?;
        let sel = self.evaluate(&Formula::compile(selection)?)?;
        let wgt = self.evaluate(&Formula::compile(weight)?)?;

        let name = format!("{}:{}", self.id, variable);
        let mut dist = Distribution::empty(name, bin_edges.to_vec());
        let n_bins = dist.n_bins();
        let last_edge = bin_edges[bin_edges.len() - 1];

        for i in 0..var.len() {
            if sel[i] <= 0.0 {
                continue;
            }
            let (v, w) = (var[i], wgt[i]);
            let w2 = w * w;
            if v < bin_edges[0] {
                dist.underflow += w;
                dist.underflow_sumw2 += w2;
                continue;
            }
            if v >= last_edge {
                dist.overflow += w;
                dist.overflow_sumw2 += w2;
                continue;
            }
            // In range; partition_point gives the first edge above v.
            let bin = (bin_edges.partition_point(|&e| e <= v) - 1).min(n_bins - 1);
            dist.bin_content[bin] += w;
            dist.sumw2[bin] += w2;
            dist.entries += 1;
        }
        Ok(dist)
    }
}

impl EventStore for ColumnStore {
    fn dataset_id(&self) -> &str {
        &self.id
    }

    fn sum_weights(&self, selection: &str, weight: &str) -> ys_core::Result<ValueWithError> {
        Ok(self.weighted_sum(selection, weight)?)
    }

    fn fill(
        &self,
        variable: &str,
        bin_edges: &[f64],
        selection: &str,
        weight: &str,
    ) -> ys_core::Result<Distribution> {
        Ok(self.fill_distribution(variable, bin_edges, selection, weight)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn store() -> ColumnStore {
        ColumnStore::new("sample")
            .with_column("x", vec![0.5, 1.5, 2.5, 0.5, -1.0, 3.5])
            .with_column("w", vec![1.0, 2.0, 1.0, 1.0, 5.0, 5.0])
    }

    #[test]
    fn weighted_sum_with_selection() {
        let s = store();
        let r = s.weighted_sum("x > 1.0", "w").unwrap();
        // rows 1.5 (w=2), 2.5 (w=1), 3.5 (w=5)
        assert_abs_diff_eq!(r.value, 8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.error, 30.0f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn unit_selection_and_weight() {
        let s = store();
        let r = s.weighted_sum(NO_SELECTION, UNIT_WEIGHT).unwrap();
        assert_abs_diff_eq!(r.value, 6.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.error, 6.0f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn fill_records_flows() {
        let s = store();
        let d = s
            .fill_distribution("x", &[0.0, 1.0, 2.0, 3.0], NO_SELECTION, UNIT_WEIGHT)
            .unwrap();
        assert_eq!(d.bin_content, vec![2.0, 1.0, 1.0]);
        assert_eq!(d.underflow, 1.0);
        assert_eq!(d.overflow, 1.0);
        assert_eq!(d.entries, 4);
    }

    #[test]
    fn fill_with_weight_tracks_sumw2() {
        let s = ColumnStore::new("s")
            .with_column("x", vec![0.5, 1.5, 0.5])
            .with_column("w", vec![2.0, 3.0, 1.0]);
        let d = s.fill_distribution("x", &[0.0, 1.0, 2.0], NO_SELECTION, "w").unwrap();
        assert_eq!(d.bin_content, vec![3.0, 3.0]);
        assert_eq!(d.sumw2, vec![5.0, 9.0]);
    }

    #[test]
    fn bin_edge_ownership() {
        // Values on an interior edge belong to the bin above; the last edge
        // is exclusive.
        let s = ColumnStore::new("s").with_column("x", vec![0.0, 1.0, 2.0]);
        let d = s.fill_distribution("x", &[0.0, 1.0, 2.0], NO_SELECTION, UNIT_WEIGHT).unwrap();
        assert_eq!(d.bin_content, vec![1.0, 1.0]);
        assert_eq!(d.overflow, 1.0);
    }

    #[test]
    fn missing_column_reported() {
        let s = store();
        let err = s.weighted_sum("nope > 1", UNIT_WEIGHT).unwrap_err();
        assert!(err.to_string().contains("missing column"));
    }

    #[test]
    fn mismatched_column_length_reported() {
        let s = ColumnStore::new("s")
            .with_column("x", vec![1.0, 2.0])
            .with_column("y", vec![1.0]);
        let err = s.weighted_sum("x > 0 && y > 0", UNIT_WEIGHT).unwrap_err();
        assert!(err.to_string().contains("length mismatch"));
    }

    #[test]
    fn bad_edges_rejected() {
        let s = store();
        assert!(s.fill_distribution("x", &[1.0], NO_SELECTION, UNIT_WEIGHT).is_err());
        assert!(s.fill_distribution("x", &[1.0, 1.0], NO_SELECTION, UNIT_WEIGHT).is_err());
        assert!(s.fill_distribution("x", &[2.0, 1.0], NO_SELECTION, UNIT_WEIGHT).is_err());
    }
}
