//! Arithmetic composition of estimators.
//!
//! A [`Process`] is either a leaf [`Estimator`] or a [`Combinator`] node
//! applying `+ - * /` to two operands, each a process or a bare constant.
//! Evaluation is lazy: a node holds structure only, and aggregations run
//! when a count or distribution is requested, so every leaf still goes
//! through the shared cache.

use std::ops::{Add, Div, Mul, Sub};
use std::sync::Arc;

use ys_core::{Distribution, Error, EventStore, Result, ValueWithError};

use crate::estimator::Estimator;
use crate::selection::Selection;
use crate::variable::{BinningOverrides, VariableSpec};

/// Binary operation of a combinator node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Sum; errors combined in quadrature.
    Add,
    /// Difference; errors combined in quadrature.
    Sub,
    /// Product; relative errors combined in quadrature.
    Mul,
    /// Ratio; relative errors combined in quadrature, zero denominators
    /// yield an exact zero.
    Div,
}

impl Op {
    fn symbol(&self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
        }
    }
}

/// One side of a combinator: a nested process or a constant.
#[derive(Debug, Clone)]
pub enum Operand {
    /// A dimensionless constant, exact (zero uncertainty).
    Constant(f64),
    /// A nested process.
    Process(Box<Process>),
}

impl Operand {
    fn name(&self) -> String {
        match self {
            Operand::Constant(c) => format!("{c}"),
            Operand::Process(p) => p.name(),
        }
    }

    fn with_store(&self, store: &Arc<dyn EventStore>) -> Operand {
        match self {
            Operand::Constant(c) => Operand::Constant(*c),
            Operand::Process(p) => Operand::Process(Box::new(p.with_store(store))),
        }
    }
}

/// A binary arithmetic node over two operands.
///
/// The node's base selection is defined as the base selection of its
/// leftmost process operand; the right side contributes values only.
#[derive(Debug, Clone)]
pub struct Combinator {
    op: Op,
    left: Operand,
    right: Operand,
}

impl Combinator {
    /// Create a node.
    pub fn new(op: Op, left: Operand, right: Operand) -> Self {
        Self { op, left, right }
    }

    /// The operation applied.
    pub fn op(&self) -> Op {
        self.op
    }
}

/// An estimator expression tree: a leaf estimator or a combinator node.
#[derive(Debug, Clone)]
pub enum Process {
    /// A single-dataset estimator.
    Leaf(Estimator),
    /// An arithmetic combination.
    Node(Combinator),
}

impl From<Estimator> for Process {
    fn from(est: Estimator) -> Self {
        Process::Leaf(est)
    }
}

impl Process {
    /// Display name: the leaf name, or `(left op right)` for nodes.
    pub fn name(&self) -> String {
        match self {
            Process::Leaf(e) => e.name().to_string(),
            Process::Node(c) => {
                format!("({} {} {})", c.left.name(), c.op.symbol(), c.right.name())
            }
        }
    }

    /// Base selection: the leaf's own, or the leftmost process operand's
    /// for nodes. Constants carry no selection.
    pub fn base_selection(&self) -> Option<&Selection> {
        match self {
            Process::Leaf(e) => e.base_selection(),
            Process::Node(c) => match (&c.left, &c.right) {
                (Operand::Process(p), _) => p.base_selection(),
                (Operand::Constant(_), Operand::Process(p)) => p.base_selection(),
                (Operand::Constant(_), Operand::Constant(_)) => None,
            },
        }
    }

    /// True when every leaf in the tree is observed data.
    pub fn is_data(&self) -> bool {
        match self {
            Process::Leaf(e) => e.is_data(),
            Process::Node(c) => {
                let side = |o: &Operand| match o {
                    Operand::Constant(_) => true,
                    Operand::Process(p) => p.is_data(),
                };
                side(&c.left) && side(&c.right)
            }
        }
    }

    /// Rebind every non-data leaf to a different dataset. Data leaves and
    /// constants are kept as they are.
    pub fn with_store(&self, store: &Arc<dyn EventStore>) -> Process {
        match self {
            Process::Leaf(e) if e.is_data() => Process::Leaf(e.clone()),
            Process::Leaf(e) => Process::Leaf(e.with_store(store.clone())),
            Process::Node(c) => Process::Node(Combinator {
                op: c.op,
                left: c.left.with_store(store),
                right: c.right.with_store(store),
            }),
        }
    }

    /// Evaluate the event count under `selection`, with errors propagated
    /// through the tree, scaled by `scale` at the root of each subtree.
    pub fn count(
        &self,
        selection: Option<&Selection>,
        weight: Option<&str>,
        scale: f64,
    ) -> Result<ValueWithError> {
        match self {
            Process::Leaf(e) => e.count(selection, weight, scale),
            Process::Node(c) => {
                let a = operand_count(&c.left, selection, weight)?;
                let b = operand_count(&c.right, selection, weight)?;
                Ok(combine_counts(c.op, a, b).scaled(scale))
            }
        }
    }

    /// Evaluate the distribution of `variable` under `selection`.
    ///
    /// Constants are admitted only as scale factors (either side of `*`,
    /// the right side of `/`); adding a bare number to a distribution has
    /// no binning and is rejected.
    pub fn distribution(
        &self,
        variable: &VariableSpec,
        selection: Option<&Selection>,
        weight: Option<&str>,
        scale: f64,
        overrides: Option<&BinningOverrides>,
    ) -> Result<Distribution> {
        match self {
            Process::Leaf(e) => e.distribution(variable, selection, weight, scale, overrides),
            Process::Node(c) => {
                let mut dist = match (&c.left, &c.right) {
                    (Operand::Process(l), Operand::Process(r)) => {
                        let mut a =
                            l.distribution(variable, selection, weight, 1.0, overrides)?;
                        let b = r.distribution(variable, selection, weight, 1.0, overrides)?;
                        match c.op {
                            Op::Add => a.add_scaled(&b, 1.0)?,
                            Op::Sub => a.add_scaled(&b, -1.0)?,
                            Op::Mul => a.multiply(&b)?,
                            Op::Div => a.divide(&b)?,
                        }
                        a
                    }
                    (Operand::Process(l), Operand::Constant(k)) => {
                        let a = l.distribution(variable, selection, weight, 1.0, overrides)?;
                        match c.op {
                            Op::Mul => a.scaled(*k),
                            Op::Div if *k == 0.0 => {
                                log::warn!(
                                    "division of '{}' by constant zero; yielding empty bins",
                                    l.name()
                                );
                                a.scaled(0.0)
                            }
                            Op::Div => a.scaled(1.0 / *k),
                            Op::Add | Op::Sub => {
                                return Err(binless_constant(c.op, &self.name()));
                            }
                        }
                    }
                    (Operand::Constant(k), Operand::Process(r)) => match c.op {
                        Op::Mul => {
                            r.distribution(variable, selection, weight, *k, overrides)?
                        }
                        _ => return Err(binless_constant(c.op, &self.name())),
                    },
                    (Operand::Constant(_), Operand::Constant(_)) => {
                        return Err(binless_constant(c.op, &self.name()));
                    }
                };
                dist.scale(scale);
                dist.name = format!("{}_{}", self.name(), variable.short_name());
                Ok(dist)
            }
        }
    }
}

fn operand_count(
    operand: &Operand,
    selection: Option<&Selection>,
    weight: Option<&str>,
) -> Result<ValueWithError> {
    match operand {
        Operand::Constant(c) => Ok(ValueWithError::exact(*c)),
        Operand::Process(p) => p.count(selection, weight, 1.0),
    }
}

fn combine_counts(op: Op, a: ValueWithError, b: ValueWithError) -> ValueWithError {
    match op {
        Op::Add => a.add_quadrature(&b),
        Op::Sub => ValueWithError::new(
            a.value - b.value,
            (a.error * a.error + b.error * b.error).sqrt(),
        ),
        Op::Mul => {
            let value = a.value * b.value;
            let rel = (a.relative().powi(2) + b.relative().powi(2)).sqrt();
            ValueWithError::new(value, value.abs() * rel)
        }
        Op::Div => {
            if b.value == 0.0 {
                log::warn!("division by zero yield; returning exact zero");
                return ValueWithError::exact(0.0);
            }
            let value = a.value / b.value;
            let rel = (a.relative().powi(2) + b.relative().powi(2)).sqrt();
            ValueWithError::new(value, value.abs() * rel)
        }
    }
}

fn binless_constant(op: Op, name: &str) -> Error {
    Error::Validation(format!(
        "constant operand of '{}' has no binning in distribution '{}'",
        op.symbol(),
        name
    ))
}

macro_rules! process_binop {
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait for Process {
            type Output = Process;

            fn $method(self, rhs: Process) -> Process {
                Process::Node(Combinator::new(
                    $op,
                    Operand::Process(Box::new(self)),
                    Operand::Process(Box::new(rhs)),
                ))
            }
        }

        impl $trait<f64> for Process {
            type Output = Process;

            fn $method(self, rhs: f64) -> Process {
                Process::Node(Combinator::new(
                    $op,
                    Operand::Process(Box::new(self)),
                    Operand::Constant(rhs),
                ))
            }
        }
    };
}

process_binop!(Add, add, Op::Add);
process_binop!(Sub, sub, Op::Sub);
process_binop!(Mul, mul, Op::Mul);
process_binop!(Div, div, Op::Div);

impl Mul<Process> for f64 {
    type Output = Process;

    fn mul(self, rhs: Process) -> Process {
        Process::Node(Combinator::new(
            Op::Mul,
            Operand::Constant(self),
            Operand::Process(Box::new(rhs)),
        ))
    }
}
