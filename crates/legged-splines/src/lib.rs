//! Node-parameterized cubic Hermite splines.
//!
//! A spline is a chain of cubic polynomials, each fully defined by the value
//! and first derivative of the two nodes bounding it plus its duration.
//! Because every quantity along the curve is linear in the node values, the
//! derivative of position, velocity or acceleration with respect to a node
//! reduces to a scalar basis weight. The derivative with respect to a
//! segment duration is nonlinear and is provided separately so that phase
//! durations can themselves be optimized.
//!
//! # Layout
//!
//! Node values are addressed as `node * 6 + entry * 3 + dim`, where `entry`
//! is 0 for the node value and 1 for its derivative. Every dense Jacobian
//! returned by [`NodeSpline`] uses this column layout.

pub mod hermite;
pub mod node_spline;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

pub use hermite::{CubicHermitePolynomial, NodeEntry, Side};
pub use node_spline::{NodeSpline, NodeWeights, TIME_TOLERANCE, VALUES_PER_NODE};

/// Spatial dimensions of every curve in this crate.
pub const DIM: usize = 3;

/// Errors raised while building or querying a spline
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SplineError {
    #[error("Time {t} is outside the spline interval [0, {total}]")]
    TimeOutOfRange { t: f64, total: f64 },
    #[error("Segment duration must be positive and finite, got {0}")]
    InvalidDuration(f64),
    #[error("A spline needs at least two nodes, got {0}")]
    TooFewNodes(usize),
    #[error("Expected {expected} segment durations for {nodes} nodes, got {actual}")]
    SegmentCountMismatch {
        nodes: usize,
        expected: usize,
        actual: usize,
    },
    #[error("Expected {expected} nodes, got {actual}")]
    NodeCountMismatch { expected: usize, actual: usize },
    #[error("Node index {index} out of range for {count} nodes")]
    NodeOutOfRange { index: usize, count: usize },
}

pub type SplineResult<T> = Result<T, SplineError>;

/// Derivative order of a curve quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dx {
    Pos,
    Vel,
    Acc,
}

/// Position, velocity and acceleration of a curve at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CurveState {
    pub p: Vector3<f64>,
    pub v: Vector3<f64>,
    pub a: Vector3<f64>,
}

impl CurveState {
    pub fn new(p: Vector3<f64>, v: Vector3<f64>, a: Vector3<f64>) -> Self {
        Self { p, v, a }
    }

    /// State at rest at position `p`.
    pub fn at_rest(p: Vector3<f64>) -> Self {
        Self {
            p,
            ..Self::default()
        }
    }

    pub fn get(&self, dx: Dx) -> &Vector3<f64> {
        match dx {
            Dx::Pos => &self.p,
            Dx::Vel => &self.v,
            Dx::Acc => &self.a,
        }
    }
}

/// Spline node: a value and its time derivative.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Node {
    pub value: Vector3<f64>,
    pub derivative: Vector3<f64>,
}

impl Node {
    pub fn new(value: Vector3<f64>, derivative: Vector3<f64>) -> Self {
        Self { value, derivative }
    }

    pub fn get(&self, entry: NodeEntry) -> &Vector3<f64> {
        match entry {
            NodeEntry::Value => &self.value,
            NodeEntry::Derivative => &self.derivative,
        }
    }

    pub fn get_mut(&mut self, entry: NodeEntry) -> &mut Vector3<f64> {
        match entry {
            NodeEntry::Value => &mut self.value,
            NodeEntry::Derivative => &mut self.derivative,
        }
    }
}
