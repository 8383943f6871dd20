//! Region definitions and the runner that evaluates them.
//!
//! A region names a chain of registered selections, an event weight, and
//! the variables to histogram. The runner resolves those names through a
//! [`Registry`], evaluates a roster of processes, and assembles the
//! serializable artifacts in [`crate::artifact`].

use std::collections::HashMap;
use std::sync::Arc;

use ys_core::{Distribution, Error, EventStore, Result, ValueWithError};

use crate::artifact::{
    ratio_series, ObservedSeries, RegionDistributions, StackEntry, SystematicBand,
    SystematicShift, SystematicsReport, YieldRow, YieldTable,
};
use crate::combinator::Process;
use crate::registry::Registry;
use crate::selection::Selection;
use crate::systematics::{StoreMap, Systematic};
use crate::variable::{Binning, BinningOverrides};

/// One analysis region: a named selection chain with an event weight and
/// a list of variables to histogram.
#[derive(Debug, Clone)]
pub struct Region {
    name: String,
    selections: Vec<String>,
    weight: Option<String>,
    variables: Vec<String>,
    binning_overrides: BinningOverrides,
}

impl Region {
    /// Create a region. Whitespace-separated words of the name act as
    /// gating tokens for systematics.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selections: Vec::new(),
            weight: None,
            variables: Vec::new(),
            binning_overrides: BinningOverrides::new(),
        }
    }

    /// Set the chain of registered selection names, ANDed in order.
    pub fn with_selections<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selections = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the region event weight expression.
    pub fn with_weight(mut self, weight: impl Into<String>) -> Self {
        self.weight = Some(weight.into());
        self
    }

    /// Set the registered variable names to histogram.
    pub fn with_variables<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables = names.into_iter().map(Into::into).collect();
        self
    }

    /// Override the binning of one variable within this region.
    pub fn with_binning_override(mut self, variable: impl Into<String>, binning: Binning) -> Self {
        self.binning_overrides.insert(variable.into(), binning);
        self
    }

    /// Region name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gating tokens: the whitespace-separated words of the name.
    pub fn tokens(&self) -> Vec<&str> {
        self.name.split_whitespace().collect()
    }

    /// Registered variable names to histogram.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Region event weight, if any.
    pub fn weight(&self) -> Option<&str> {
        self.weight.as_deref()
    }
}

/// Which processes play which role in a region's outputs.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    /// Stacked background processes, in stacking order.
    pub backgrounds: Vec<String>,
    /// Signal processes, drawn unstacked and kept out of totals.
    pub signals: Vec<String>,
    /// Observed data process, if any.
    pub observed: Option<String>,
}

/// Runner behavior switches.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Fold under/overflow into the edge bins of every distribution.
    pub fold_flow: bool,
    /// Rescale backgrounds so their total matches the observed yield.
    pub normalize_to_observed: bool,
    /// Extra scale applied to signal processes only.
    pub signal_scale: f64,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self { fold_flow: true, normalize_to_observed: false, signal_scale: 1.0 }
    }
}

/// Evaluates a roster of processes over regions and produces artifacts.
pub struct RegionRunner {
    registry: Registry,
    processes: HashMap<String, Process>,
    stores: StoreMap,
    systematics: Vec<Systematic>,
    roster: Roster,
    options: RunnerOptions,
}

impl RegionRunner {
    /// Create a runner over a populated registry.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            processes: HashMap::new(),
            stores: StoreMap::new(),
            systematics: Vec::new(),
            roster: Roster::default(),
            options: RunnerOptions::default(),
        }
    }

    /// Register a named process.
    pub fn add_process(&mut self, name: impl Into<String>, process: Process) {
        self.processes.insert(name.into(), process);
    }

    /// Register an alternative dataset for store-substitution systematics.
    pub fn add_store(&mut self, id: impl Into<String>, store: Arc<dyn EventStore>) {
        self.stores.insert(id.into(), store);
    }

    /// Add a systematic variation.
    pub fn add_systematic(&mut self, systematic: Systematic) {
        self.systematics.push(systematic);
    }

    /// Set the roster of backgrounds, signals, and observed data.
    pub fn set_roster(&mut self, roster: Roster) {
        self.roster = roster;
    }

    /// Set the runner options.
    pub fn set_options(&mut self, options: RunnerOptions) {
        self.options = options;
    }

    /// The registry this runner resolves names through.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn process(&self, name: &str) -> Result<&Process> {
        self.processes.get(name).ok_or_else(|| Error::resolution("process", name))
    }

    fn region_selection(&self, region: &Region) -> Result<Selection> {
        let names: Vec<&str> = region.selections.iter().map(String::as_str).collect();
        self.registry.selection_chain(&names)
    }

    /// Stacked distributions of one variable in `region`.
    pub fn distributions(&self, region: &Region, variable: &str) -> Result<RegionDistributions> {
        let sel = self.region_selection(region)?;
        let var = self.registry.variable(variable)?;
        let overrides = Some(&region.binning_overrides);
        let binning = var.resolve_binning(overrides);
        let edges = binning.edges();
        log::info!(
            "region '{}': filling '{}' under '{}'",
            region.name,
            variable,
            sel.name()
        );

        let mut dists = Vec::with_capacity(self.roster.backgrounds.len());
        for name in &self.roster.backgrounds {
            let dist = self.process(name)?.distribution(
                var,
                Some(&sel),
                region.weight(),
                1.0,
                overrides,
            )?;
            dists.push((name.as_str(), dist));
        }

        let mut total = Distribution::empty(format!("{}_total", region.name), edges.clone());
        for (_, dist) in &dists {
            total.add_scaled(dist, 1.0)?;
        }

        let observed_dist = match &self.roster.observed {
            Some(name) => Some((
                name.as_str(),
                self.process(name)?.distribution(var, Some(&sel), region.weight(), 1.0, overrides)?,
            )),
            None => None,
        };

        // Normalization uses full integrals so the choice of fold_flow
        // cannot change the factor.
        if self.options.normalize_to_observed {
            if let Some((_, obs)) = &observed_dist {
                let expected = total.integral_with_flow();
                if expected != 0.0 {
                    let factor = obs.integral_with_flow() / expected;
                    log::info!("region '{}': normalization factor {factor:.4}", region.name);
                    for (_, dist) in &mut dists {
                        dist.scale(factor);
                    }
                    total.scale(factor);
                }
            }
        }

        let mut signals = Vec::with_capacity(self.roster.signals.len());
        for name in &self.roster.signals {
            let dist = self.process(name)?.distribution(
                var,
                Some(&sel),
                region.weight(),
                self.options.signal_scale,
                overrides,
            )?;
            signals.push((name.as_str(), dist));
        }

        let fold = |mut d: Distribution| {
            if self.options.fold_flow {
                d.fold_flow();
            }
            d
        };
        let total = fold(total);
        let stack: Vec<StackEntry> = dists
            .into_iter()
            .map(|(name, d)| StackEntry::from_distribution(name, &fold(d)))
            .collect();
        let signal_entries: Vec<StackEntry> = signals
            .into_iter()
            .map(|(name, d)| StackEntry::from_distribution(name, &fold(d)))
            .collect();

        let (observed, ratio) = match observed_dist {
            Some((name, dist)) => {
                let dist = fold(dist);
                let is_data =
                    self.process(name).map(|p| p.is_data()).unwrap_or(false);
                let series = if is_data {
                    ObservedSeries::poisson(name, &dist)
                } else {
                    ObservedSeries::symmetric(name, &dist)
                };
                let ratio = ratio_series(&dist.bin_content, &total.bin_content);
                (Some(series), Some(ratio))
            }
            None => (None, None),
        };

        Ok(RegionDistributions {
            region: region.name.clone(),
            variable: variable.to_string(),
            x_title: var.axis_label().to_string(),
            y_title: var.y_title(binning),
            bin_edges: edges,
            stack,
            signals: signal_entries,
            total: StackEntry {
                name: total.name.clone(),
                yields: total.bin_content.clone(),
                errors: total.bin_errors(),
            },
            observed,
            ratio,
        })
    }

    /// Distributions for every variable the region lists.
    pub fn all_distributions(&self, region: &Region) -> Result<Vec<RegionDistributions>> {
        region
            .variables()
            .iter()
            .map(|v| self.distributions(region, v))
            .collect()
    }

    /// Per-process yield table for `region`.
    pub fn yields(&self, region: &Region) -> Result<YieldTable> {
        let sel = self.region_selection(region)?;
        log::info!("region '{}': yields under '{}'", region.name, sel.name());

        let mut rows = Vec::with_capacity(self.roster.backgrounds.len());
        let mut total = ValueWithError::exact(0.0);
        for name in &self.roster.backgrounds {
            let count = self.process(name)?.count(Some(&sel), region.weight(), 1.0)?;
            total = total.add_quadrature(&count);
            rows.push(YieldRow::new(name.clone(), count));
        }

        let mut signals = Vec::with_capacity(self.roster.signals.len());
        for name in &self.roster.signals {
            let count = self.process(name)?.count(
                Some(&sel),
                region.weight(),
                self.options.signal_scale,
            )?;
            signals.push(YieldRow::new(name.clone(), count));
        }

        let observed = match &self.roster.observed {
            Some(name) => {
                let count = self.process(name)?.count(Some(&sel), region.weight(), 1.0)?;
                Some(YieldRow::new(name.clone(), count))
            }
            None => None,
        };

        let data_over_expected = observed.as_ref().and_then(|obs| {
            if total.value != 0.0 {
                Some(obs.value / total.value)
            } else {
                None
            }
        });

        Ok(YieldTable {
            region: region.name.clone(),
            rows,
            signals,
            total: YieldRow::new("total", total),
            observed,
            data_over_expected,
        })
    }

    /// Yield shifts of every gated (systematic, process) pair in `region`.
    pub fn systematics_report(&self, region: &Region) -> Result<SystematicsReport> {
        let sel = self.region_selection(region)?;
        let tokens = region.tokens();

        let mut nominal: HashMap<&str, f64> = HashMap::new();
        let mut nominal_total = 0.0;
        for name in &self.roster.backgrounds {
            let count = self.process(name)?.count(Some(&sel), region.weight(), 1.0)?;
            nominal.insert(name.as_str(), count.value);
            nominal_total += count.value;
        }

        let mut shifts = Vec::new();
        let mut sum_up2 = 0.0;
        let mut sum_down2 = 0.0;
        for sys in &self.systematics {
            if !sys.applies_to_region(&tokens) {
                continue;
            }
            let mut sys_up = 0.0;
            let mut sys_down = 0.0;
            for name in &self.roster.backgrounds {
                if !sys.applies_to_process(name) {
                    continue;
                }
                let process = self.process(name)?;
                let ((up_proc, up_w), (down_proc, down_w)) =
                    sys.apply(process, region.weight(), &self.stores)?;
                let up = up_proc.count(Some(&sel), up_w.as_deref(), 1.0)?.value;
                let down = down_proc.count(Some(&sel), down_w.as_deref(), 1.0)?.value;
                let base = nominal[name.as_str()];
                sys_up += up - base;
                sys_down += down - base;
                shifts.push(SystematicShift {
                    systematic: sys.name().to_string(),
                    process: name.clone(),
                    nominal: base,
                    delta_up: up - base,
                    delta_down: down - base,
                });
            }
            sum_up2 += sys_up * sys_up;
            sum_down2 += sys_down * sys_down;
        }

        Ok(SystematicsReport {
            region: region.name.clone(),
            nominal_total,
            shifts,
            total_up: sum_up2.sqrt(),
            total_down: sum_down2.sqrt(),
        })
    }

    /// Per-bin deviations of `variable` for every gated (systematic,
    /// process) pair in `region`, as signed differences from the nominal
    /// distribution.
    pub fn systematics_bands(&self, region: &Region, variable: &str) -> Result<Vec<SystematicBand>> {
        let sel = self.region_selection(region)?;
        let var = self.registry.variable(variable)?;
        let overrides = Some(&region.binning_overrides);
        let tokens = region.tokens();

        let fold = |mut d: Distribution| {
            if self.options.fold_flow {
                d.fold_flow();
            }
            d
        };

        let mut nominal: HashMap<&str, Distribution> = HashMap::new();
        for name in &self.roster.backgrounds {
            let dist = self.process(name)?.distribution(
                var,
                Some(&sel),
                region.weight(),
                1.0,
                overrides,
            )?;
            nominal.insert(name.as_str(), fold(dist));
        }

        let mut bands = Vec::new();
        for sys in &self.systematics {
            if !sys.applies_to_region(&tokens) {
                continue;
            }
            for name in &self.roster.backgrounds {
                if !sys.applies_to_process(name) {
                    continue;
                }
                let process = self.process(name)?;
                let ((up_proc, up_w), (down_proc, down_w)) =
                    sys.apply(process, region.weight(), &self.stores)?;
                let up = fold(up_proc.distribution(var, Some(&sel), up_w.as_deref(), 1.0, overrides)?);
                let down =
                    fold(down_proc.distribution(var, Some(&sel), down_w.as_deref(), 1.0, overrides)?);
                let base = &nominal[name.as_str()];
                let delta = |varied: &Distribution| {
                    varied
                        .bin_content
                        .iter()
                        .zip(&base.bin_content)
                        .map(|(v, n)| v - n)
                        .collect::<Vec<f64>>()
                };
                bands.push(SystematicBand {
                    systematic: sys.name().to_string(),
                    process: name.clone(),
                    delta_up: delta(&up),
                    delta_down: delta(&down),
                });
            }
        }
        Ok(bands)
    }
}
