//! Descriptors of derived quantities to histogram.

use std::collections::HashMap;

use ys_core::{Error, Result};

use crate::selection::Selection;

/// Histogram binning: uniform (count, range) or explicit edges.
#[derive(Debug, Clone, PartialEq)]
pub enum Binning {
    /// `bins` equal-width bins over `[lo, hi)`.
    Uniform {
        /// Number of bins.
        bins: usize,
        /// Lower edge of the first bin.
        lo: f64,
        /// Upper edge of the last bin.
        hi: f64,
    },
    /// Explicit, strictly increasing bin edges.
    Edges(Vec<f64>),
}

impl Binning {
    /// Materialize the bin edges.
    pub fn edges(&self) -> Vec<f64> {
        match self {
            Binning::Uniform { bins, lo, hi } => {
                let width = (hi - lo) / *bins as f64;
                (0..=*bins).map(|i| lo + width * i as f64).collect()
            }
            Binning::Edges(edges) => edges.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        let ok = match self {
            Binning::Uniform { bins, lo, hi } => *bins > 0 && lo < hi,
            Binning::Edges(edges) => {
                edges.len() >= 2 && edges.windows(2).all(|w| w[0] < w[1])
            }
        };
        if ok {
            Ok(())
        } else {
            Err(Error::Validation(format!("malformed binning: {self:?}")))
        }
    }
}

/// Per-region binning overrides, keyed by variable short name.
pub type BinningOverrides = HashMap<String, Binning>;

/// Per-variable weight override.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableWeight {
    /// Extra per-event weight expression, multiplied into the request weight.
    Expr(String),
    /// Constant scale factor, multiplied into the request scale.
    Scale(f64),
}

/// Descriptor of a derived scalar quantity to histogram: expression,
/// default binning, axis metadata, and optional per-variable weight and
/// base selection.
#[derive(Debug, Clone)]
pub struct VariableSpec {
    short_name: String,
    expression: String,
    binning: Binning,
    axis_label: String,
    unit: Option<String>,
    weight: Option<VariableWeight>,
    base_selection: Option<Selection>,
}

impl VariableSpec {
    /// Create a variable descriptor. The physical unit, if any, is parsed
    /// once from a bracketed substring of the axis label (e.g. `"[GeV]"`).
    pub fn new(
        short_name: impl Into<String>,
        expression: impl Into<String>,
        binning: Binning,
        axis_label: impl Into<String>,
    ) -> Result<Self> {
        binning.validate()?;
        let axis_label = axis_label.into();
        let unit = parse_unit(&axis_label);
        Ok(Self {
            short_name: short_name.into(),
            expression: expression.into(),
            binning,
            axis_label,
            unit,
            weight: None,
            base_selection: None,
        })
    }

    /// Set a per-variable weight override.
    pub fn with_weight(mut self, weight: VariableWeight) -> Self {
        self.weight = Some(weight);
        self
    }

    /// Set a base selection ANDed into every request for this variable.
    pub fn with_base_selection(mut self, selection: Selection) -> Self {
        self.base_selection = Some(selection);
        self
    }

    /// Unique key of the variable within a registry.
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// Backend-evaluable expression computing the value from an event.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// X-axis label, as given at construction.
    pub fn axis_label(&self) -> &str {
        &self.axis_label
    }

    /// Physical unit parsed from the axis label, if any.
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Per-variable weight override, if any.
    pub fn weight(&self) -> Option<&VariableWeight> {
        self.weight.as_ref()
    }

    /// Per-variable base selection, if any.
    pub fn base_selection(&self) -> Option<&Selection> {
        self.base_selection.as_ref()
    }

    /// Binning to use for a request: the override for this variable when
    /// present, else the default.
    pub fn resolve_binning<'a>(&'a self, overrides: Option<&'a BinningOverrides>) -> &'a Binning {
        overrides
            .and_then(|map| map.get(&self.short_name))
            .unwrap_or(&self.binning)
    }

    /// Y-axis label: "Events / width unit" for uniform binning, plain
    /// "Events" for explicit (variable-width) edges.
    pub fn y_title(&self, binning: &Binning) -> String {
        match binning {
            Binning::Edges(_) => "Events".to_string(),
            Binning::Uniform { bins, lo, hi } => {
                let width = (hi - lo) / *bins as f64;
                match &self.unit {
                    Some(unit) => format!("Events / {} {}", trim_number(width), unit),
                    None => format!("Events / {}", trim_number(width)),
                }
            }
        }
    }
}

fn parse_unit(label: &str) -> Option<String> {
    let open = label.find('[')?;
    let close = label[open..].find(']')? + open;
    if close > open + 1 {
        Some(label[open + 1..close].to_string())
    } else {
        None
    }
}

fn trim_number(x: f64) -> String {
    let s = format!("{x:.2}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_edges() {
        let b = Binning::Uniform { bins: 4, lo: 0.0, hi: 2.0 };
        assert_eq!(b.edges(), vec![0.0, 0.5, 1.0, 1.5, 2.0]);
    }

    #[test]
    fn unit_parsed_from_axis_label() {
        let v = VariableSpec::new(
            "mll",
            "mll",
            Binning::Uniform { bins: 10, lo: 0.0, hi: 200.0 },
            "m_{ll} [GeV]",
        )
        .unwrap();
        assert_eq!(v.unit(), Some("GeV"));

        let v = VariableSpec::new(
            "njet",
            "njet",
            Binning::Uniform { bins: 10, lo: 0.0, hi: 10.0 },
            "Jet multiplicity",
        )
        .unwrap();
        assert_eq!(v.unit(), None);
    }

    #[test]
    fn y_title_reflects_bin_width_and_unit() {
        let v = VariableSpec::new(
            "mll",
            "mll",
            Binning::Uniform { bins: 10, lo: 0.0, hi: 200.0 },
            "m_{ll} [GeV]",
        )
        .unwrap();
        assert_eq!(v.y_title(v.resolve_binning(None)), "Events / 20 GeV");
        assert_eq!(v.y_title(&Binning::Edges(vec![0.0, 50.0, 200.0])), "Events");
        assert_eq!(
            v.y_title(&Binning::Uniform { bins: 8, lo: 0.0, hi: 2.0 }),
            "Events / 0.25 GeV"
        );
    }

    #[test]
    fn override_preferred_over_default() {
        let v = VariableSpec::new(
            "pt",
            "pt",
            Binning::Uniform { bins: 10, lo: 0.0, hi: 100.0 },
            "p_{T} [GeV]",
        )
        .unwrap();
        let mut overrides = BinningOverrides::new();
        overrides.insert("pt".into(), Binning::Edges(vec![0.0, 30.0, 100.0]));
        assert_eq!(
            v.resolve_binning(Some(&overrides)),
            &Binning::Edges(vec![0.0, 30.0, 100.0])
        );
        // Overrides for other variables do not apply.
        let mut other = BinningOverrides::new();
        other.insert("mll".into(), Binning::Edges(vec![0.0, 1.0]));
        assert_eq!(v.resolve_binning(Some(&other)), &Binning::Uniform { bins: 10, lo: 0.0, hi: 100.0 });
    }

    #[test]
    fn malformed_binnings_rejected() {
        assert!(VariableSpec::new("x", "x", Binning::Uniform { bins: 0, lo: 0.0, hi: 1.0 }, "x")
            .is_err());
        assert!(VariableSpec::new("x", "x", Binning::Edges(vec![1.0]), "x").is_err());
        assert!(VariableSpec::new("x", "x", Binning::Edges(vec![2.0, 1.0]), "x").is_err());
    }
}
