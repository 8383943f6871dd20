//! # ys-engine
//!
//! Selection algebra, cached aggregation, and background estimation over
//! event stores.
//!
//! The building blocks:
//!
//! - [`Selection`]: named boolean predicates with canonical AND
//!   composition, so logically equal conjunctions share cache entries.
//! - [`VariableSpec`]: derived quantities to histogram, with binning and
//!   axis metadata.
//! - [`Estimator`] and [`Process`]: leaf yield estimators over a dataset,
//!   composable with `+ - * /` and full error propagation.
//! - [`AggregationCache`]: a shared, injected cache of unscaled counts and
//!   distributions keyed by structured identity.
//! - [`Registry`], [`Region`], [`RegionRunner`]: name resolution, region
//!   definitions, and the evaluation loop producing serializable
//!   distributions, yield tables, and systematics reports.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod artifact;
pub mod cache;
pub mod combinator;
pub mod estimator;
pub mod region;
pub mod registry;
pub mod selection;
pub mod systematics;
pub mod variable;

pub use artifact::{RegionDistributions, SystematicsReport, YieldTable};
pub use cache::{AggregationCache, CacheKey, CacheStats};
pub use combinator::{Combinator, Op, Operand, Process};
pub use estimator::Estimator;
pub use region::{Region, RegionRunner, Roster, RunnerOptions};
pub use registry::Registry;
pub use selection::Selection;
pub use systematics::{Systematic, Variation};
pub use variable::{Binning, BinningOverrides, VariableSpec, VariableWeight};
