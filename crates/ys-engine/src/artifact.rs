//! Serializable result artifacts for one region.
//!
//! Everything here derives `Serialize` and is meant to be dumped as JSON
//! for plotting frontends: stacked distributions with an observed overlay
//! and ratio panel, a per-process yield table, and a systematics report.

use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use ys_core::{Distribution, ValueWithError};

// Two-sided coverage outside a 68.27% central interval.
const ALPHA: f64 = 0.317_310_507_862_914;

/// Garwood 68% central confidence interval half-widths for a Poisson
/// count `n`, returned as `(err_low, err_high)`.
pub fn garwood_68_interval(n: f64) -> (f64, f64) {
    let lo = if n > 0.0 {
        match ChiSquared::new(2.0 * n) {
            Ok(chi) => n - 0.5 * chi.inverse_cdf(ALPHA / 2.0),
            Err(_) => n.sqrt(),
        }
    } else {
        0.0
    };
    let hi = match ChiSquared::new(2.0 * (n + 1.0)) {
        Ok(chi) => 0.5 * chi.inverse_cdf(1.0 - ALPHA / 2.0) - n,
        Err(_) => n.sqrt(),
    };
    (lo, hi)
}

/// One named histogram series in a stack.
#[derive(Debug, Clone, Serialize)]
pub struct StackEntry {
    /// Process name.
    pub name: String,
    /// Bin contents.
    pub yields: Vec<f64>,
    /// Per-bin statistical errors.
    pub errors: Vec<f64>,
}

impl StackEntry {
    /// Build a series from a distribution's visible bins.
    pub fn from_distribution(name: impl Into<String>, dist: &Distribution) -> Self {
        Self {
            name: name.into(),
            yields: dist.bin_content.clone(),
            errors: dist.bin_errors(),
        }
    }
}

/// Observed data points with asymmetric errors.
#[derive(Debug, Clone, Serialize)]
pub struct ObservedSeries {
    /// Series name.
    pub name: String,
    /// Bin counts.
    pub counts: Vec<f64>,
    /// Downward error per bin.
    pub err_low: Vec<f64>,
    /// Upward error per bin.
    pub err_high: Vec<f64>,
}

impl ObservedSeries {
    /// Garwood Poisson intervals per bin, for unweighted counts.
    pub fn poisson(name: impl Into<String>, dist: &Distribution) -> Self {
        let mut err_low = Vec::with_capacity(dist.n_bins());
        let mut err_high = Vec::with_capacity(dist.n_bins());
        for &n in &dist.bin_content {
            let (lo, hi) = garwood_68_interval(n.max(0.0));
            err_low.push(lo);
            err_high.push(hi);
        }
        Self { name: name.into(), counts: dist.bin_content.clone(), err_low, err_high }
    }

    /// Symmetric sqrt(sumw2) errors, for weighted "observed" series.
    pub fn symmetric(name: impl Into<String>, dist: &Distribution) -> Self {
        let errors = dist.bin_errors();
        Self {
            name: name.into(),
            counts: dist.bin_content.clone(),
            err_low: errors.clone(),
            err_high: errors,
        }
    }
}

/// Bin-wise `data / total` ratio; bins with zero total are NaN so a
/// frontend can leave them blank.
pub fn ratio_series(data: &[f64], total: &[f64]) -> Vec<f64> {
    data.iter()
        .zip(total)
        .map(|(d, t)| if *t == 0.0 { f64::NAN } else { d / t })
        .collect()
}

/// Stacked distributions of one variable in one region.
#[derive(Debug, Clone, Serialize)]
pub struct RegionDistributions {
    /// Region name.
    pub region: String,
    /// Variable short name.
    pub variable: String,
    /// X-axis title.
    pub x_title: String,
    /// Y-axis title.
    pub y_title: String,
    /// Bin edges shared by every series.
    pub bin_edges: Vec<f64>,
    /// Background series, in stacking order.
    pub stack: Vec<StackEntry>,
    /// Signal series, drawn unstacked.
    pub signals: Vec<StackEntry>,
    /// Sum of the background stack.
    pub total: StackEntry,
    /// Observed data overlay, when an observed process is present.
    pub observed: Option<ObservedSeries>,
    /// `observed / total` per bin (NaN where the total is empty).
    pub ratio: Option<Vec<f64>>,
}

/// One row of a yield table.
#[derive(Debug, Clone, Serialize)]
pub struct YieldRow {
    /// Process name.
    pub process: String,
    /// Event yield.
    #[serde(rename = "yield")]
    pub value: f64,
    /// Statistical error on the yield.
    pub error: f64,
}

impl YieldRow {
    /// Build a row from a process yield.
    pub fn new(process: impl Into<String>, yield_: ValueWithError) -> Self {
        Self { process: process.into(), value: yield_.value, error: yield_.error }
    }
}

/// Per-process yields in one region.
#[derive(Debug, Clone, Serialize)]
pub struct YieldTable {
    /// Region name.
    pub region: String,
    /// Background rows, one per process.
    pub rows: Vec<YieldRow>,
    /// Signal rows, kept out of the total.
    pub signals: Vec<YieldRow>,
    /// Sum of the background rows, errors in quadrature.
    pub total: YieldRow,
    /// Observed count, when an observed process is present.
    pub observed: Option<YieldRow>,
    /// `observed / total`, when both are defined and the total is nonzero.
    pub data_over_expected: Option<f64>,
}

/// Up/down yield shift of one process under one systematic, as signed
/// differences from the nominal yield.
#[derive(Debug, Clone, Serialize)]
pub struct SystematicShift {
    /// Systematic name.
    pub systematic: String,
    /// Process name.
    pub process: String,
    /// Nominal yield.
    pub nominal: f64,
    /// `up - nominal`.
    pub delta_up: f64,
    /// `down - nominal`.
    pub delta_down: f64,
}

/// Per-bin distribution deviations of one process under one systematic.
#[derive(Debug, Clone, Serialize)]
pub struct SystematicBand {
    /// Systematic name.
    pub systematic: String,
    /// Process name.
    pub process: String,
    /// `up - nominal` per bin.
    pub delta_up: Vec<f64>,
    /// `down - nominal` per bin.
    pub delta_down: Vec<f64>,
}

/// Systematic shifts of every gated (systematic, process) pair in a
/// region, with quadrature totals over the background sum.
#[derive(Debug, Clone, Serialize)]
pub struct SystematicsReport {
    /// Region name.
    pub region: String,
    /// Nominal total background yield.
    pub nominal_total: f64,
    /// Individual shifts.
    pub shifts: Vec<SystematicShift>,
    /// Quadrature sum of the per-systematic total up-shifts.
    pub total_up: f64,
    /// Quadrature sum of the per-systematic total down-shifts.
    pub total_down: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn garwood_zero_count() {
        let (lo, hi) = garwood_68_interval(0.0);
        assert_eq!(lo, 0.0);
        assert_abs_diff_eq!(hi, 1.8410, epsilon = 1e-3);
    }

    #[test]
    fn garwood_one_count() {
        let (lo, hi) = garwood_68_interval(1.0);
        assert_abs_diff_eq!(lo, 0.8273, epsilon = 1e-3);
        assert_abs_diff_eq!(hi, 2.2998, epsilon = 1e-3);
    }

    #[test]
    fn garwood_approaches_sqrt_for_large_counts() {
        let (lo, hi) = garwood_68_interval(10_000.0);
        assert_abs_diff_eq!(lo, 100.0, epsilon = 1.0);
        assert_abs_diff_eq!(hi, 100.0, epsilon = 2.0);
    }

    #[test]
    fn ratio_nan_on_empty_total() {
        let r = ratio_series(&[2.0, 1.0, 3.0], &[4.0, 0.0, 3.0]);
        assert_abs_diff_eq!(r[0], 0.5, epsilon = 1e-12);
        assert!(r[1].is_nan());
        assert_abs_diff_eq!(r[2], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn stack_entry_carries_bin_errors() {
        let mut d = Distribution::empty("d", vec![0.0, 1.0, 2.0]);
        d.bin_content = vec![4.0, 9.0];
        d.sumw2 = vec![4.0, 9.0];
        let e = StackEntry::from_distribution("bkg", &d);
        assert_eq!(e.yields, vec![4.0, 9.0]);
        assert_eq!(e.errors, vec![2.0, 3.0]);
    }

    #[test]
    fn yield_row_serializes_with_yield_key() {
        let row = YieldRow::new("ttbar", ValueWithError::new(12.5, 0.5));
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["yield"], 12.5);
        assert_eq!(json["process"], "ttbar");
    }
}
