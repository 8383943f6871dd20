//! Leaf yield estimators bound to a dataset.
//!
//! An estimator owns a base selection, a base scale, and an optional base
//! weight. Every aggregation it runs is keyed and cached *unscaled*; the
//! base scale and the request scale are applied after retrieval, so
//! changing a normalization never invalidates cached work.

use std::sync::Arc;

use ys_core::{Distribution, EventStore, Result, ValueWithError};

use crate::cache::{AggregationCache, CacheKey};
use crate::selection::Selection;
use crate::variable::{BinningOverrides, VariableSpec, VariableWeight};

/// A yield estimator over one dataset.
#[derive(Clone)]
pub struct Estimator {
    name: String,
    store: Arc<dyn EventStore>,
    cache: Arc<AggregationCache>,
    base_selection: Option<Selection>,
    base_scale: f64,
    base_weight: Option<String>,
    is_data: bool,
}

impl std::fmt::Debug for Estimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Estimator")
            .field("name", &self.name)
            .field("dataset", &self.store.dataset_id())
            .field("base_selection", &self.base_selection.as_ref().map(|s| s.name()))
            .field("base_scale", &self.base_scale)
            .field("base_weight", &self.base_weight)
            .field("is_data", &self.is_data)
            .finish()
    }
}

impl Estimator {
    /// Create an estimator over `store`, sharing `cache`.
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn EventStore>,
        cache: Arc<AggregationCache>,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            cache,
            base_selection: None,
            base_scale: 1.0,
            base_weight: None,
            is_data: false,
        }
    }

    /// Set the base selection (replacing any previous one).
    pub fn with_base_selection(mut self, selection: Selection) -> Self {
        self.base_selection = Some(selection);
        self
    }

    /// Set the base scale factor.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.base_scale = scale;
        self
    }

    /// Set the base per-event weight expression.
    pub fn with_weight(mut self, weight: impl Into<String>) -> Self {
        self.base_weight = Some(weight.into());
        self
    }

    /// Mark this estimator as observed data. Data estimators ignore
    /// request-level event weights (their base weight still applies).
    pub fn as_data(mut self) -> Self {
        self.is_data = true;
        self
    }

    /// Derive a renamed copy, e.g. for a restricted sub-sample.
    pub fn derive(&self, name: impl Into<String>) -> Self {
        let mut out = self.clone();
        out.name = name.into();
        out
    }

    /// Derive a composed copy: `selection` is ANDed into the base
    /// selection, `scale` multiplies the base scale, and `weight` is
    /// textually multiplied into the base weight.
    pub fn derived(
        &self,
        selection: Option<&Selection>,
        scale: f64,
        weight: Option<&str>,
    ) -> Self {
        let mut out = self.clone();
        out.base_selection = Selection::and_opt(self.base_selection.as_ref(), selection);
        out.base_scale = self.base_scale * scale;
        out.base_weight = match (&self.base_weight, weight) {
            (Some(a), Some(b)) => Some(format!("({a}) * ({b})")),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.to_string()),
            (None, None) => None,
        };
        out
    }

    /// A copy whose base selection is the conjunction of the current base
    /// with `selection`.
    pub fn restricted(&self, selection: &Selection) -> Self {
        let mut out = self.clone();
        out.base_selection =
            Selection::and_opt(self.base_selection.as_ref(), Some(selection));
        out
    }

    /// A copy bound to a different dataset; everything else is kept.
    pub fn with_store(&self, store: Arc<dyn EventStore>) -> Self {
        let mut out = self.clone();
        out.store = store;
        out
    }

    /// Estimator name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier of the backing dataset.
    pub fn dataset_id(&self) -> &str {
        self.store.dataset_id()
    }

    /// Whether this estimator represents observed data.
    pub fn is_data(&self) -> bool {
        self.is_data
    }

    /// Base selection, if any.
    pub fn base_selection(&self) -> Option<&Selection> {
        self.base_selection.as_ref()
    }

    /// Base scale factor.
    pub fn base_scale(&self) -> f64 {
        self.base_scale
    }

    fn effective_selection(&self, request: Option<&Selection>) -> Selection {
        Selection::and_opt(self.base_selection.as_ref(), request)
            .unwrap_or_else(Selection::all)
    }

    /// Combine the base weight with a request-level event weight. Data
    /// estimators keep only their base weight.
    fn compose_weight(&self, request: Option<&str>, extra: Option<&str>) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(w) = &self.base_weight {
            parts.push(w);
        }
        if !self.is_data {
            if let Some(w) = extra {
                parts.push(w);
            }
            if let Some(w) = request {
                parts.push(w);
            }
        }
        match parts.as_slice() {
            [] => "1.0".to_string(),
            [one] => (*one).to_string(),
            many => many.iter().map(|p| format!("({p})")).collect::<Vec<_>>().join(" * "),
        }
    }

    /// Weighted event count under `selection`, scaled by the base scale
    /// times `scale`. The unscaled sum is cached.
    pub fn count(
        &self,
        selection: Option<&Selection>,
        weight: Option<&str>,
        scale: f64,
    ) -> Result<ValueWithError> {
        let sel = self.effective_selection(selection);
        let weight_text = self.compose_weight(weight, None);
        let key = CacheKey::count(self.store.dataset_id(), sel.name(), &weight_text);
        let unscaled = self
            .cache
            .count_or_insert_with(&key, || self.store.sum_weights(sel.expr(), &weight_text))?;
        Ok(unscaled.scaled(self.base_scale * scale))
    }

    /// Weighted distribution of `variable` under `selection`, scaled by
    /// the base scale times `scale` times any constant variable weight.
    /// The unscaled distribution is cached; per-variable base selections
    /// and expression weights are folded into the request before keying.
    pub fn distribution(
        &self,
        variable: &VariableSpec,
        selection: Option<&Selection>,
        weight: Option<&str>,
        scale: f64,
        overrides: Option<&BinningOverrides>,
    ) -> Result<Distribution> {
        let sel = Selection::and_opt(variable.base_selection(), selection);
        let sel = Selection::and_opt(self.base_selection.as_ref(), sel.as_ref())
            .unwrap_or_else(Selection::all);

        let mut factor = self.base_scale * scale;
        let mut var_weight = None;
        match variable.weight() {
            Some(VariableWeight::Expr(expr)) => var_weight = Some(expr.as_str()),
            Some(VariableWeight::Scale(s)) => factor *= s,
            None => {}
        }
        let weight_text = self.compose_weight(weight, var_weight);

        let edges = variable.resolve_binning(overrides).edges();
        let key = CacheKey::distribution(
            self.store.dataset_id(),
            sel.name(),
            &weight_text,
            variable.expression(),
            &edges,
        );
        let unscaled = self.cache.distribution_or_insert_with(&key, || {
            self.store.fill(variable.expression(), &edges, sel.expr(), &weight_text)
        })?;
        let mut dist = unscaled.scaled(factor);
        dist.name = format!("{}_{}", self.name, variable.short_name());
        Ok(dist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variable::Binning;
    use approx::assert_abs_diff_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Stub store that counts backend calls and returns fixed yields.
    struct CountingStore {
        id: String,
        value: f64,
        calls: AtomicUsize,
    }

    impl CountingStore {
        fn new(id: &str, value: f64) -> Self {
            Self { id: id.into(), value, calls: AtomicUsize::new(0) }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl EventStore for CountingStore {
        fn dataset_id(&self) -> &str {
            &self.id
        }

        fn sum_weights(&self, _selection: &str, _weight: &str) -> Result<ValueWithError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ValueWithError::new(self.value, self.value.sqrt()))
        }

        fn fill(
            &self,
            variable: &str,
            bin_edges: &[f64],
            _selection: &str,
            _weight: &str,
        ) -> Result<Distribution> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut d = Distribution::empty(variable.to_string(), bin_edges.to_vec());
            d.bin_content[0] = self.value;
            d.sumw2[0] = self.value;
            Ok(d)
        }
    }

    fn setup(value: f64) -> (Arc<CountingStore>, Arc<AggregationCache>) {
        (Arc::new(CountingStore::new("ds", value)), Arc::new(AggregationCache::new()))
    }

    #[test]
    fn scale_applied_after_cache() {
        let (store, cache) = setup(10.0);
        let est = Estimator::new("bkg", store.clone(), cache).with_scale(2.0);
        let a = est.count(None, None, 1.0).unwrap();
        let b = est.count(None, None, 3.0).unwrap();
        assert_eq!(store.calls(), 1);
        assert_abs_diff_eq!(a.value, 20.0, epsilon = 1e-12);
        assert_abs_diff_eq!(b.value, 60.0, epsilon = 1e-12);
        assert_abs_diff_eq!(b.error, 3.0 * 2.0 * 10.0f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn canonical_selections_share_one_entry() {
        let (store, cache) = setup(5.0);
        let est = Estimator::new("bkg", store.clone(), cache.clone());
        let a = Selection::new("A", "a > 0");
        let b = Selection::new("B", "b > 0");
        est.count(Some(&a.and(&b)), None, 1.0).unwrap();
        est.count(Some(&b.and(&a)), None, 1.0).unwrap();
        assert_eq!(store.calls(), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn base_selection_restricts_requests() {
        let (store, cache) = setup(5.0);
        let a = Selection::new("A", "a > 0");
        let b = Selection::new("B", "b > 0");
        let est = Estimator::new("bkg", store.clone(), cache.clone())
            .with_base_selection(a.clone());
        // Asking for B under base A is the same entry as asking for A AND B
        // without a base.
        est.count(Some(&b), None, 1.0).unwrap();
        let plain = Estimator::new("other", store.clone(), cache);
        plain.count(Some(&a.and(&b)), None, 1.0).unwrap();
        assert_eq!(store.calls(), 1);
    }

    #[test]
    fn data_ignores_request_weight() {
        let (store, cache) = setup(7.0);
        let data = Estimator::new("obs", store.clone(), cache.clone()).as_data();
        let mc = Estimator::new("mc", store.clone(), cache);
        data.count(None, Some("lumi_weight"), 1.0).unwrap();
        data.count(None, None, 1.0).unwrap();
        // Both data requests collapse to the unit weight entry.
        assert_eq!(store.calls(), 1);
        mc.count(None, Some("lumi_weight"), 1.0).unwrap();
        assert_eq!(store.calls(), 2);
    }

    /// Store returning a fixed yield for one exact (predicate, weight)
    /// pair and zero for anything else.
    struct MatchingStore {
        predicate: &'static str,
        weight: &'static str,
        calls: AtomicUsize,
    }

    impl EventStore for MatchingStore {
        fn dataset_id(&self) -> &str {
            "ds"
        }

        fn sum_weights(&self, selection: &str, weight: &str) -> Result<ValueWithError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if selection == self.predicate && weight == self.weight {
                Ok(ValueWithError::new(100.0, 10.0))
            } else {
                Ok(ValueWithError::exact(0.0))
            }
        }

        fn fill(
            &self,
            variable: &str,
            bin_edges: &[f64],
            _selection: &str,
            _weight: &str,
        ) -> Result<Distribution> {
            Ok(Distribution::empty(variable.to_string(), bin_edges.to_vec()))
        }
    }

    #[test]
    fn derived_chain_canonicalizes_before_querying() {
        let store = Arc::new(MatchingStore {
            predicate: "a > 0 && b > 0",
            weight: "w",
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(AggregationCache::new());
        let a = Selection::new("A", "a > 0");
        let b = Selection::new("B", "b > 0");

        let base = Estimator::new("bkg", store.clone(), cache);
        let forward = base.derived(Some(&a), 1.0, None).derived(Some(&b), 1.0, Some("w"));
        let r = forward.count(None, None, 1.0).unwrap();
        assert_abs_diff_eq!(r.value, 100.0, epsilon = 1e-12);
        assert_abs_diff_eq!(r.error, 10.0, epsilon = 1e-12);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);

        // Opposite derivation order produces the same canonical key.
        let reversed = base.derived(Some(&b), 1.0, None).derived(Some(&a), 1.0, Some("w"));
        let r = reversed.count(None, None, 1.0).unwrap();
        assert_abs_diff_eq!(r.value, 100.0, epsilon = 1e-12);
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn derived_multiplies_scale_and_weight() {
        let (store, cache) = setup(10.0);
        let base = Estimator::new("bkg", store, cache)
            .with_scale(2.0)
            .with_weight("w0");
        let sub = base.derived(None, 3.0, Some("w1"));
        assert_abs_diff_eq!(sub.base_scale(), 6.0, epsilon = 1e-12);
        let r = sub.count(None, None, 1.0).unwrap();
        assert_abs_diff_eq!(r.value, 60.0, epsilon = 1e-12);
    }

    #[test]
    fn restricted_derives_conjunction() {
        let (store, cache) = setup(1.0);
        let a = Selection::new("A", "a > 0");
        let b = Selection::new("B", "b > 0");
        let est = Estimator::new("bkg", store, cache).with_base_selection(a);
        let sub = est.restricted(&b);
        assert_eq!(sub.base_selection().unwrap().name(), "A AND B");
        assert_eq!(est.base_selection().unwrap().name(), "A");
    }

    #[test]
    fn distribution_scaled_and_cached_unscaled() {
        let (store, cache) = setup(4.0);
        let est = Estimator::new("bkg", store.clone(), cache).with_scale(2.0);
        let var = VariableSpec::new(
            "x",
            "x",
            Binning::Uniform { bins: 2, lo: 0.0, hi: 2.0 },
            "x",
        )
        .unwrap();
        let d1 = est.distribution(&var, None, None, 1.0, None).unwrap();
        let d2 = est.distribution(&var, None, None, 5.0, None).unwrap();
        assert_eq!(store.calls(), 1);
        assert_abs_diff_eq!(d1.bin_content[0], 8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(d2.bin_content[0], 40.0, epsilon = 1e-12);
        assert_eq!(d1.name, "bkg_x");
    }

    #[test]
    fn binning_override_changes_cache_entry() {
        let (store, cache) = setup(4.0);
        let est = Estimator::new("bkg", store.clone(), cache);
        let var = VariableSpec::new(
            "x",
            "x",
            Binning::Uniform { bins: 2, lo: 0.0, hi: 2.0 },
            "x",
        )
        .unwrap();
        est.distribution(&var, None, None, 1.0, None).unwrap();
        let mut overrides = BinningOverrides::new();
        overrides.insert("x".into(), Binning::Edges(vec![0.0, 0.5, 2.0]));
        est.distribution(&var, None, None, 1.0, Some(&overrides)).unwrap();
        assert_eq!(store.calls(), 2);
    }

    #[test]
    fn constant_variable_weight_scales_without_new_entry() {
        let (store, cache) = setup(4.0);
        let est = Estimator::new("bkg", store.clone(), cache);
        let plain = VariableSpec::new(
            "x",
            "x",
            Binning::Uniform { bins: 2, lo: 0.0, hi: 2.0 },
            "x",
        )
        .unwrap();
        let scaled = plain.clone().with_weight(VariableWeight::Scale(3.0));
        let d1 = est.distribution(&plain, None, None, 1.0, None).unwrap();
        let d2 = est.distribution(&scaled, None, None, 1.0, None).unwrap();
        assert_eq!(store.calls(), 1);
        assert_abs_diff_eq!(d2.bin_content[0], 3.0 * d1.bin_content[0], epsilon = 1e-12);
    }
}
