//! Cubic Hermite polynomial between two nodes.
//!
//! For start node `(p0, v0)`, end node `(p1, v1)` and duration `T`, the
//! polynomial in local time `τ ∈ [0, T]` is
//!
//! ```text
//! x(τ) = a0 + a1 τ + a2 τ² + a3 τ³
//! a0 = p0
//! a1 = v0
//! a2 = -(3 (p0 - p1) + T (2 v0 + v1)) / T²
//! a3 =  (2 (p0 - p1) + T (v0 + v1)) / T³
//! ```
//!
//! The coefficients are linear in the node values, so every partial with
//! respect to a node entry is the dot product of a monomial basis with a
//! constant coefficient sensitivity.

use nalgebra::Vector3;

use crate::{CurveState, Dx, Node, SplineError, SplineResult};

/// End of a polynomial a node is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Start,
    End,
}

/// Entry of a node: its value or its time derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeEntry {
    Value,
    Derivative,
}

impl NodeEntry {
    pub const ALL: [NodeEntry; 2] = [NodeEntry::Value, NodeEntry::Derivative];

    /// Offset of this entry inside a node's six stored values.
    pub fn offset(self) -> usize {
        match self {
            NodeEntry::Value => 0,
            NodeEntry::Derivative => crate::DIM,
        }
    }
}

/// Cubic polynomial interpolating two nodes over a fixed duration.
#[derive(Debug, Clone, PartialEq)]
pub struct CubicHermitePolynomial {
    start: Node,
    end: Node,
    duration: f64,
    coefficients: [Vector3<f64>; 4],
}

impl CubicHermitePolynomial {
    /// Build the polynomial; fails for a non-positive or non-finite duration.
    pub fn new(start: Node, end: Node, duration: f64) -> SplineResult<Self> {
        if !(duration.is_finite() && duration > 0.0) {
            return Err(SplineError::InvalidDuration(duration));
        }

        let t = duration;
        let t2 = t * t;
        let t3 = t2 * t;
        let delta = start.value - end.value;

        let a0 = start.value;
        let a1 = start.derivative;
        let a2 = -(delta * 3.0 + (start.derivative * 2.0 + end.derivative) * t) / t2;
        let a3 = (delta * 2.0 + (start.derivative + end.derivative) * t) / t3;

        Ok(Self {
            start,
            end,
            duration,
            coefficients: [a0, a1, a2, a3],
        })
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn start(&self) -> &Node {
        &self.start
    }

    pub fn end(&self) -> &Node {
        &self.end
    }

    /// Position, velocity and acceleration at local time `tau`.
    pub fn state_at(&self, tau: f64) -> CurveState {
        CurveState {
            p: self.evaluate(Dx::Pos, tau),
            v: self.evaluate(Dx::Vel, tau),
            a: self.evaluate(Dx::Acc, tau),
        }
    }

    /// Single quantity at local time `tau`.
    pub fn evaluate(&self, dx: Dx, tau: f64) -> Vector3<f64> {
        let basis = monomial_basis(dx, tau);
        self.coefficients
            .iter()
            .zip(basis.iter())
            .fold(Vector3::zeros(), |acc, (c, b)| acc + c * *b)
    }

    /// Time derivative of quantity `dx` (velocity for position, acceleration
    /// for velocity, jerk for acceleration).
    pub fn time_derivative(&self, dx: Dx, tau: f64) -> Vector3<f64> {
        match dx {
            Dx::Pos => self.evaluate(Dx::Vel, tau),
            Dx::Vel => self.evaluate(Dx::Acc, tau),
            Dx::Acc => self.coefficients[3] * 6.0,
        }
    }

    /// Partial of quantity `dx` at `tau` with respect to one entry of one
    /// node. The same weight applies to every spatial dimension.
    pub fn derivative_wrt_node(&self, dx: Dx, side: Side, entry: NodeEntry, tau: f64) -> f64 {
        let basis = monomial_basis(dx, tau);
        let sensitivity = self.coefficient_sensitivity(side, entry);
        basis
            .iter()
            .zip(sensitivity.iter())
            .map(|(b, s)| b * s)
            .sum()
    }

    /// Partial of quantity `dx` with respect to the duration at fixed local time.
    pub fn derivative_wrt_duration(&self, dx: Dx, tau: f64) -> Vector3<f64> {
        let t = self.duration;
        let t2 = t * t;
        let t3 = t2 * t;
        let t4 = t3 * t;
        let delta = self.start.value - self.end.value;
        let v0 = self.start.derivative;
        let v1 = self.end.derivative;

        let d_a2 = delta * (6.0 / t3) + (v0 * 2.0 + v1) / t2;
        let d_a3 = delta * (-6.0 / t4) - (v0 + v1) * (2.0 / t3);

        let basis = monomial_basis(dx, tau);
        d_a2 * basis[2] + d_a3 * basis[3]
    }

    fn coefficient_sensitivity(&self, side: Side, entry: NodeEntry) -> [f64; 4] {
        let t = self.duration;
        let t2 = t * t;
        let t3 = t2 * t;
        match (side, entry) {
            (Side::Start, NodeEntry::Value) => [1.0, 0.0, -3.0 / t2, 2.0 / t3],
            (Side::Start, NodeEntry::Derivative) => [0.0, 1.0, -2.0 / t, 1.0 / t2],
            (Side::End, NodeEntry::Value) => [0.0, 0.0, 3.0 / t2, -2.0 / t3],
            (Side::End, NodeEntry::Derivative) => [0.0, 0.0, -1.0 / t, 1.0 / t2],
        }
    }
}

/// Derivatives of `[1, τ, τ², τ³]` of the given order.
fn monomial_basis(dx: Dx, tau: f64) -> [f64; 4] {
    match dx {
        Dx::Pos => [1.0, tau, tau * tau, tau * tau * tau],
        Dx::Vel => [0.0, 1.0, 2.0 * tau, 3.0 * tau * tau],
        Dx::Acc => [0.0, 0.0, 2.0, 6.0 * tau],
    }
}
