//! Common data types for yieldstat

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A scalar yield with its statistical uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueWithError {
    /// Central value (sum of weights).
    pub value: f64,
    /// Statistical error (sqrt of the sum of squared weights).
    pub error: f64,
}

impl ValueWithError {
    /// Create a new value with uncertainty.
    pub fn new(value: f64, error: f64) -> Self {
        Self { value, error }
    }

    /// A value known exactly (zero uncertainty), e.g. a bare constant.
    pub fn exact(value: f64) -> Self {
        Self { value, error: 0.0 }
    }

    /// Multiply both the value and the error by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self { value: self.value * factor, error: self.error * factor }
    }

    /// Sum of two values with errors combined in quadrature.
    pub fn add_quadrature(&self, other: &ValueWithError) -> Self {
        Self {
            value: self.value + other.value,
            error: (self.error * self.error + other.error * other.error).sqrt(),
        }
    }

    /// Relative uncertainty; zero when the central value is zero.
    pub fn relative(&self) -> f64 {
        if self.value != 0.0 {
            self.error / self.value
        } else {
            0.0
        }
    }
}

/// A 1D weighted distribution (bin contents plus per-bin sum of squared
/// weights), with under/overflow recorded separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    /// Distribution name.
    pub name: String,
    /// Bin edges (length = number of bins + 1, strictly increasing).
    pub bin_edges: Vec<f64>,
    /// Bin contents (sum of weights per bin).
    pub bin_content: Vec<f64>,
    /// Sum of squared weights per bin.
    pub sumw2: Vec<f64>,
    /// Underflow sum of weights.
    pub underflow: f64,
    /// Underflow sum of squared weights.
    pub underflow_sumw2: f64,
    /// Overflow sum of weights.
    pub overflow: f64,
    /// Overflow sum of squared weights.
    pub overflow_sumw2: f64,
    /// Number of entries that passed the selection.
    pub entries: u64,
}

impl Distribution {
    /// Create an empty distribution over the given edges.
    pub fn empty(name: impl Into<String>, bin_edges: Vec<f64>) -> Self {
        let n_bins = bin_edges.len().saturating_sub(1);
        Self {
            name: name.into(),
            bin_edges,
            bin_content: vec![0.0; n_bins],
            sumw2: vec![0.0; n_bins],
            underflow: 0.0,
            underflow_sumw2: 0.0,
            overflow: 0.0,
            overflow_sumw2: 0.0,
            entries: 0,
        }
    }

    /// Number of visible bins.
    pub fn n_bins(&self) -> usize {
        self.bin_content.len()
    }

    /// Per-bin statistical errors (sqrt of sumw2).
    pub fn bin_errors(&self) -> Vec<f64> {
        self.sumw2.iter().map(|&s| s.max(0.0).sqrt()).collect()
    }

    /// Sum of visible bin contents.
    pub fn integral(&self) -> f64 {
        self.bin_content.iter().sum()
    }

    /// Sum of bin contents including under/overflow.
    pub fn integral_with_flow(&self) -> f64 {
        self.integral() + self.underflow + self.overflow
    }

    /// Integral with its statistical uncertainty (visible bins only).
    pub fn integral_with_error(&self) -> ValueWithError {
        let sumw2: f64 = self.sumw2.iter().sum();
        ValueWithError::new(self.integral(), sumw2.max(0.0).sqrt())
    }

    /// Return a copy with contents scaled by `factor` (errors scale
    /// linearly, sumw2 quadratically). Entries are unchanged.
    pub fn scaled(&self, factor: f64) -> Self {
        let f2 = factor * factor;
        Self {
            name: self.name.clone(),
            bin_edges: self.bin_edges.clone(),
            bin_content: self.bin_content.iter().map(|v| v * factor).collect(),
            sumw2: self.sumw2.iter().map(|s| s * f2).collect(),
            underflow: self.underflow * factor,
            underflow_sumw2: self.underflow_sumw2 * f2,
            overflow: self.overflow * factor,
            overflow_sumw2: self.overflow_sumw2 * f2,
            entries: self.entries,
        }
    }

    /// Scale in place.
    pub fn scale(&mut self, factor: f64) {
        let f2 = factor * factor;
        for v in &mut self.bin_content {
            *v *= factor;
        }
        for s in &mut self.sumw2 {
            *s *= f2;
        }
        self.underflow *= factor;
        self.underflow_sumw2 *= f2;
        self.overflow *= factor;
        self.overflow_sumw2 *= f2;
    }

    fn check_compatible(&self, other: &Distribution) -> Result<()> {
        if self.bin_edges != other.bin_edges {
            return Err(Error::Validation(format!(
                "incompatible binnings: '{}' vs '{}'",
                self.name, other.name
            )));
        }
        Ok(())
    }

    /// Add `coeff * other` bin by bin (errors in quadrature), including flows.
    pub fn add_scaled(&mut self, other: &Distribution, coeff: f64) -> Result<()> {
        self.check_compatible(other)?;
        let c2 = coeff * coeff;
        for (v, o) in self.bin_content.iter_mut().zip(&other.bin_content) {
            *v += coeff * o;
        }
        for (s, o) in self.sumw2.iter_mut().zip(&other.sumw2) {
            *s += c2 * o;
        }
        self.underflow += coeff * other.underflow;
        self.underflow_sumw2 += c2 * other.underflow_sumw2;
        self.overflow += coeff * other.overflow;
        self.overflow_sumw2 += c2 * other.overflow_sumw2;
        self.entries += other.entries;
        Ok(())
    }

    /// Bin-wise product: `c = a * b`, `var(c) = var(a) b^2 + var(b) a^2`.
    pub fn multiply(&mut self, other: &Distribution) -> Result<()> {
        self.check_compatible(other)?;
        for i in 0..self.bin_content.len() {
            let (a, b) = (self.bin_content[i], other.bin_content[i]);
            self.sumw2[i] = self.sumw2[i] * b * b + other.sumw2[i] * a * a;
            self.bin_content[i] = a * b;
        }
        Ok(())
    }

    /// Bin-wise ratio: `c = a / b`, `var(c) = (var(a) b^2 + var(b) a^2) / b^4`.
    ///
    /// Bins with a zero denominator are set to zero content and zero error
    /// rather than producing infinities.
    pub fn divide(&mut self, other: &Distribution) -> Result<()> {
        self.check_compatible(other)?;
        for i in 0..self.bin_content.len() {
            let (a, b) = (self.bin_content[i], other.bin_content[i]);
            if b == 0.0 {
                self.bin_content[i] = 0.0;
                self.sumw2[i] = 0.0;
                continue;
            }
            let b2 = b * b;
            self.sumw2[i] = (self.sumw2[i] * b2 + other.sumw2[i] * a * a) / (b2 * b2);
            self.bin_content[i] = a / b;
        }
        Ok(())
    }

    /// Fold underflow into the first visible bin and overflow into the last
    /// (errors in quadrature). The flow slots are zeroed afterwards so the
    /// fold is not applied twice.
    pub fn fold_flow(&mut self) {
        let n = self.bin_content.len();
        if n == 0 {
            return;
        }
        self.bin_content[0] += self.underflow;
        self.sumw2[0] += self.underflow_sumw2;
        self.bin_content[n - 1] += self.overflow;
        self.sumw2[n - 1] += self.overflow_sumw2;
        self.underflow = 0.0;
        self.underflow_sumw2 = 0.0;
        self.overflow = 0.0;
        self.overflow_sumw2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn dist(name: &str, content: Vec<f64>, sumw2: Vec<f64>) -> Distribution {
        let n = content.len();
        let edges: Vec<f64> = (0..=n).map(|i| i as f64).collect();
        Distribution {
            name: name.into(),
            bin_edges: edges,
            bin_content: content,
            sumw2,
            underflow: 0.0,
            underflow_sumw2: 0.0,
            overflow: 0.0,
            overflow_sumw2: 0.0,
            entries: n as u64,
        }
    }

    #[test]
    fn scaled_distribution() {
        let d = dist("d", vec![1.0, 2.0], vec![1.0, 4.0]).scaled(2.0);
        assert_eq!(d.bin_content, vec![2.0, 4.0]);
        assert_eq!(d.sumw2, vec![4.0, 16.0]);
        assert_eq!(d.bin_errors(), vec![2.0, 4.0]);
    }

    #[test]
    fn add_scaled_subtracts() {
        let mut a = dist("a", vec![5.0, 5.0], vec![1.0, 1.0]);
        let b = dist("b", vec![2.0, 3.0], vec![1.0, 1.0]);
        a.add_scaled(&b, -1.0).unwrap();
        assert_eq!(a.bin_content, vec![3.0, 2.0]);
        assert_abs_diff_eq!(a.bin_errors()[0], 2.0f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn divide_guards_zero_bins() {
        let mut a = dist("a", vec![4.0, 4.0], vec![1.0, 1.0]);
        let b = dist("b", vec![2.0, 0.0], vec![1.0, 0.0]);
        a.divide(&b).unwrap();
        assert_eq!(a.bin_content, vec![2.0, 0.0]);
        assert!(a.bin_content.iter().all(|v| v.is_finite()));
        assert_eq!(a.sumw2[1], 0.0);
    }

    #[test]
    fn incompatible_binnings_rejected() {
        let mut a = dist("a", vec![1.0], vec![1.0]);
        let b = dist("b", vec![1.0, 1.0], vec![1.0, 1.0]);
        assert!(a.add_scaled(&b, 1.0).is_err());
    }

    #[test]
    fn fold_flow_is_idempotent_after_zeroing() {
        let mut d = dist("d", vec![1.0, 1.0], vec![1.0, 1.0]);
        d.underflow = 3.0;
        d.underflow_sumw2 = 9.0;
        d.overflow = 2.0;
        d.overflow_sumw2 = 4.0;
        d.fold_flow();
        assert_eq!(d.bin_content, vec![4.0, 3.0]);
        assert_eq!(d.sumw2, vec![10.0, 5.0]);
        d.fold_flow();
        assert_eq!(d.bin_content, vec![4.0, 3.0]);
    }

    #[test]
    fn quadrature_sum() {
        let a = ValueWithError::new(10.0, 1.0);
        let b = ValueWithError::new(5.0, 1.0);
        let s = a.add_quadrature(&b);
        assert_abs_diff_eq!(s.value, 15.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.error, 2.0f64.sqrt(), epsilon = 1e-12);
    }
}
