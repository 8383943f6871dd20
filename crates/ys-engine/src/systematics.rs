//! Systematic variations: paired up/down distortions of a process.
//!
//! A variation is either a reweighting (the nominal event weight is
//! multiplied by an up/down expression) or a dataset substitution (the
//! process is re-aggregated against alternative stores). Variations can be
//! gated to regions by name tokens and to specific processes.

use std::collections::HashMap;
use std::sync::Arc;

use ys_core::{Error, EventStore, Result};

use crate::combinator::Process;

/// Named event stores available for dataset-substitution variations.
pub type StoreMap = HashMap<String, Arc<dyn EventStore>>;

/// How a systematic distorts a process.
#[derive(Debug, Clone)]
pub enum Variation {
    /// Multiply the nominal event weight by the up/down expressions.
    Weight {
        /// Weight expression of the upward variation.
        up: String,
        /// Weight expression of the downward variation.
        down: String,
    },
    /// Re-aggregate against alternative datasets, looked up by identifier.
    Store {
        /// Dataset identifier of the upward variation.
        up: String,
        /// Dataset identifier of the downward variation.
        down: String,
    },
}

/// A named systematic uncertainty source.
#[derive(Debug, Clone)]
pub struct Systematic {
    name: String,
    variation: Variation,
    region_tokens: Option<Vec<String>>,
    processes: Option<Vec<String>>,
}

/// A process paired with the event weight to evaluate it under.
pub type VariedProcess = (Process, Option<String>);

impl Systematic {
    /// Create a systematic applying everywhere.
    pub fn new(name: impl Into<String>, variation: Variation) -> Self {
        Self { name: name.into(), variation, region_tokens: None, processes: None }
    }

    /// Restrict to regions whose token list contains any of `tokens`.
    pub fn with_region_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.region_tokens = Some(tokens.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict to the named processes.
    pub fn with_processes<I, S>(mut self, processes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.processes = Some(processes.into_iter().map(Into::into).collect());
        self
    }

    /// Systematic name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The variation this systematic applies.
    pub fn variation(&self) -> &Variation {
        &self.variation
    }

    /// Whether the systematic applies in a region with these name tokens.
    pub fn applies_to_region(&self, tokens: &[&str]) -> bool {
        match &self.region_tokens {
            None => true,
            Some(gates) => gates.iter().any(|g| tokens.contains(&g.as_str())),
        }
    }

    /// Whether the systematic applies to the named process.
    pub fn applies_to_process(&self, process: &str) -> bool {
        match &self.processes {
            None => true,
            Some(names) => names.iter().any(|n| n == process),
        }
    }

    /// Build the up and down variants of `process` evaluated under the
    /// nominal event weight `weight`. Store substitutions are resolved
    /// through `stores`; an unknown dataset identifier is an error.
    pub fn apply(
        &self,
        process: &Process,
        weight: Option<&str>,
        stores: &StoreMap,
    ) -> Result<(VariedProcess, VariedProcess)> {
        match &self.variation {
            Variation::Weight { up, down } => Ok((
                (process.clone(), Some(multiply_weights(weight, up))),
                (process.clone(), Some(multiply_weights(weight, down))),
            )),
            Variation::Store { up, down } => {
                let up_store = stores
                    .get(up)
                    .ok_or_else(|| Error::resolution("dataset", up))?;
                let down_store = stores
                    .get(down)
                    .ok_or_else(|| Error::resolution("dataset", down))?;
                let weight = weight.map(str::to_string);
                Ok((
                    (process.with_store(up_store), weight.clone()),
                    (process.with_store(down_store), weight),
                ))
            }
        }
    }
}

/// Multiply an optional nominal weight by a variation weight expression.
pub(crate) fn multiply_weights(nominal: Option<&str>, extra: &str) -> String {
    match nominal {
        Some(w) => format!("({w}) * ({extra})"),
        None => extra.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weight_sys(name: &str) -> Systematic {
        Systematic::new(
            name,
            Variation::Weight { up: "w_up".into(), down: "w_dn".into() },
        )
    }

    #[test]
    fn ungated_applies_everywhere() {
        let s = weight_sys("JES");
        assert!(s.applies_to_region(&["SR", "2Lep"]));
        assert!(s.applies_to_process("ttbar"));
    }

    #[test]
    fn region_token_gating() {
        let s = weight_sys("FakesEl").with_region_tokens(["ElEl", "OF"]);
        assert!(s.applies_to_region(&["SR", "ElEl"]));
        assert!(s.applies_to_region(&["OF", "CR"]));
        assert!(!s.applies_to_region(&["MuMu", "SR"]));
    }

    #[test]
    fn process_gating() {
        let s = weight_sys("BTag").with_processes(["ttbar"]);
        assert!(s.applies_to_process("ttbar"));
        assert!(!s.applies_to_process("diboson"));
    }

    #[test]
    fn weight_composition() {
        assert_eq!(multiply_weights(Some("w0"), "w_up"), "(w0) * (w_up)");
        assert_eq!(multiply_weights(None, "w_up"), "w_up");
    }

    #[test]
    fn unknown_store_reported() {
        use crate::cache::AggregationCache;
        use crate::estimator::Estimator;
        use ys_core::{Distribution, ValueWithError};

        struct Dummy;
        impl EventStore for Dummy {
            fn dataset_id(&self) -> &str {
                "dummy"
            }
            fn sum_weights(&self, _: &str, _: &str) -> Result<ValueWithError> {
                Ok(ValueWithError::exact(0.0))
            }
            fn fill(&self, v: &str, e: &[f64], _: &str, _: &str) -> Result<Distribution> {
                Ok(Distribution::empty(v.to_string(), e.to_vec()))
            }
        }

        let cache = Arc::new(AggregationCache::new());
        let process = Process::Leaf(Estimator::new("p", Arc::new(Dummy), cache));
        let s = Systematic::new(
            "TreeSys",
            Variation::Store { up: "missing_up".into(), down: "missing_dn".into() },
        );
        let err = s.apply(&process, None, &StoreMap::new()).unwrap_err();
        assert!(err.to_string().contains("missing_up"));
    }
}
