//! Chain of cubic Hermite polynomials sharing their boundary nodes.

use nalgebra::DMatrix;

use crate::hermite::{CubicHermitePolynomial, NodeEntry, Side};
use crate::{CurveState, Dx, Node, SplineError, SplineResult, DIM};

/// Slack accepted when locating a time inside the spline interval.
pub const TIME_TOLERANCE: f64 = 1e-9;

/// Number of stored scalars per node (value and derivative, three dimensions each).
pub const VALUES_PER_NODE: usize = 2 * DIM;

/// Basis weights linking the two nodes of the active segment to one quantity.
///
/// `weights[side][entry]` is the partial of the quantity (in every dimension)
/// with respect to the same dimension of that node entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeWeights {
    pub segment: usize,
    pub weights: [[f64; 2]; 2],
}

impl NodeWeights {
    pub fn node_id(&self, side: Side) -> usize {
        match side {
            Side::Start => self.segment,
            Side::End => self.segment + 1,
        }
    }

    pub fn weight(&self, side: Side, entry: NodeEntry) -> f64 {
        let s = match side {
            Side::Start => 0,
            Side::End => 1,
        };
        let e = match entry {
            NodeEntry::Value => 0,
            NodeEntry::Derivative => 1,
        };
        self.weights[s][e]
    }
}

/// Piecewise cubic Hermite spline.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpline {
    nodes: Vec<Node>,
    durations: Vec<f64>,
    polynomials: Vec<CubicHermitePolynomial>,
}

impl NodeSpline {
    /// Build a spline from `n` nodes and `n - 1` segment durations.
    pub fn new(nodes: Vec<Node>, durations: Vec<f64>) -> SplineResult<Self> {
        if nodes.len() < 2 {
            return Err(SplineError::TooFewNodes(nodes.len()));
        }
        if durations.len() != nodes.len() - 1 {
            return Err(SplineError::SegmentCountMismatch {
                nodes: nodes.len(),
                expected: nodes.len() - 1,
                actual: durations.len(),
            });
        }
        let polynomials = build_polynomials(&nodes, &durations)?;
        Ok(Self {
            nodes,
            durations,
            polynomials,
        })
    }

    /// Spline whose segments all last `total_duration / (n - 1)`.
    pub fn uniform(nodes: Vec<Node>, total_duration: f64) -> SplineResult<Self> {
        let segments = nodes.len().saturating_sub(1).max(1);
        let durations = vec![total_duration / segments as f64; nodes.len().saturating_sub(1)];
        Self::new(nodes, durations)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn durations(&self) -> &[f64] {
        &self.durations
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn segment_count(&self) -> usize {
        self.durations.len()
    }

    pub fn total_duration(&self) -> f64 {
        self.durations.iter().sum()
    }

    /// Replace every node; the node count must not change.
    pub fn set_nodes(&mut self, nodes: Vec<Node>) -> SplineResult<()> {
        if nodes.len() != self.nodes.len() {
            return Err(SplineError::NodeCountMismatch {
                expected: self.nodes.len(),
                actual: nodes.len(),
            });
        }
        self.polynomials = build_polynomials(&nodes, &self.durations)?;
        self.nodes = nodes;
        Ok(())
    }

    /// Replace every segment duration; the segment count must not change.
    pub fn set_durations(&mut self, durations: Vec<f64>) -> SplineResult<()> {
        if durations.len() != self.durations.len() {
            return Err(SplineError::SegmentCountMismatch {
                nodes: self.nodes.len(),
                expected: self.durations.len(),
                actual: durations.len(),
            });
        }
        self.polynomials = build_polynomials(&self.nodes, &durations)?;
        self.durations = durations;
        Ok(())
    }

    /// Active segment and local time for global time `t`.
    ///
    /// A time exactly on a boundary belongs to the earlier segment.
    pub fn segment_at(&self, t: f64) -> SplineResult<(usize, f64)> {
        let total = self.total_duration();
        if !t.is_finite() || t < -TIME_TOLERANCE || t > total + TIME_TOLERANCE {
            return Err(SplineError::TimeOutOfRange { t, total });
        }

        let last = self.durations.len() - 1;
        let mut start = 0.0;
        for (id, &duration) in self.durations.iter().enumerate() {
            let end = start + duration;
            if t <= end + TIME_TOLERANCE || id == last {
                return Ok((id, t - start));
            }
            start = end;
        }
        Err(SplineError::TimeOutOfRange { t, total })
    }

    pub fn state_at(&self, t: f64) -> SplineResult<CurveState> {
        let (id, tau) = self.segment_at(t)?;
        Ok(self.polynomials[id].state_at(tau))
    }

    /// Weights of the active segment's nodes on quantity `dx` at time `t`.
    pub fn node_weights(&self, t: f64, dx: Dx) -> SplineResult<NodeWeights> {
        let (segment, tau) = self.segment_at(t)?;
        let poly = &self.polynomials[segment];
        let mut weights = [[0.0; 2]; 2];
        for (s, side) in [Side::Start, Side::End].into_iter().enumerate() {
            for (e, entry) in NodeEntry::ALL.into_iter().enumerate() {
                weights[s][e] = poly.derivative_wrt_node(dx, side, entry, tau);
            }
        }
        Ok(NodeWeights { segment, weights })
    }

    /// Dense `3 × 6N` Jacobian of quantity `dx` at `t` w.r.t. all node values.
    pub fn node_jacobian(&self, t: f64, dx: Dx) -> SplineResult<DMatrix<f64>> {
        let weights = self.node_weights(t, dx)?;
        let mut jac = DMatrix::zeros(DIM, self.nodes.len() * VALUES_PER_NODE);
        for side in [Side::Start, Side::End] {
            let node = weights.node_id(side);
            for entry in NodeEntry::ALL {
                let w = weights.weight(side, entry);
                for dim in 0..DIM {
                    jac[(dim, node * VALUES_PER_NODE + entry.offset() + dim)] += w;
                }
            }
        }
        Ok(jac)
    }

    /// Dense `3 × S` Jacobian of quantity `dx` at `t` w.r.t. every segment
    /// duration. Earlier segments shift the local time of the active one.
    pub fn segment_duration_jacobian(&self, t: f64, dx: Dx) -> SplineResult<DMatrix<f64>> {
        let (segment, tau) = self.segment_at(t)?;
        let poly = &self.polynomials[segment];
        let mut jac = DMatrix::zeros(DIM, self.durations.len());

        let shift = -poly.time_derivative(dx, tau);
        for previous in 0..segment {
            jac.column_mut(previous).copy_from(&shift);
        }
        jac.column_mut(segment)
            .copy_from(&poly.derivative_wrt_duration(dx, tau));
        Ok(jac)
    }

    /// Node value at `index` (layout `node * 6 + entry * 3 + dim`).
    pub fn node_value(&self, index: usize) -> SplineResult<f64> {
        let node = index / VALUES_PER_NODE;
        let rest = index % VALUES_PER_NODE;
        let n = self.nodes.get(node).ok_or(SplineError::NodeOutOfRange {
            index: node,
            count: self.nodes.len(),
        })?;
        let entry = if rest < DIM {
            NodeEntry::Value
        } else {
            NodeEntry::Derivative
        };
        Ok(n.get(entry)[rest % DIM])
    }
}

fn build_polynomials(
    nodes: &[Node],
    durations: &[f64],
) -> SplineResult<Vec<CubicHermitePolynomial>> {
    nodes
        .windows(2)
        .zip(durations)
        .map(|(pair, &duration)| CubicHermitePolynomial::new(pair[0], pair[1], duration))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    const FD_STEP: f64 = 1e-6;

    fn test_spline() -> NodeSpline {
        let nodes = vec![
            Node::new(Vector3::new(0.0, 0.0, 0.5), Vector3::new(0.1, 0.0, 0.0)),
            Node::new(Vector3::new(0.2, 0.1, 0.55), Vector3::new(0.3, -0.1, 0.2)),
            Node::new(Vector3::new(0.5, 0.0, 0.5), Vector3::new(0.0, 0.2, -0.1)),
            Node::new(Vector3::new(0.8, -0.1, 0.45), Vector3::new(0.1, 0.0, 0.0)),
        ];
        NodeSpline::new(nodes, vec![0.3, 0.5, 0.2]).unwrap()
    }

    #[test]
    fn test_construction_checks_counts() {
        let node = Node::default();
        assert_eq!(
            NodeSpline::new(vec![node], vec![]),
            Err(SplineError::TooFewNodes(1))
        );
        assert!(matches!(
            NodeSpline::new(vec![node, node], vec![0.5, 0.5]),
            Err(SplineError::SegmentCountMismatch { .. })
        ));
    }

    #[test]
    fn test_uniform_spline_durations() {
        let spline = NodeSpline::uniform(vec![Node::default(); 5], 2.0).unwrap();
        assert_eq!(spline.segment_count(), 4);
        assert_relative_eq!(spline.total_duration(), 2.0, epsilon = 1e-12);
        assert!(spline.durations().iter().all(|&d| (d - 0.5).abs() < 1e-12));
    }

    #[test]
    fn test_rejected_update_keeps_spline() {
        let mut spline = test_spline();
        let before = spline.clone();
        assert!(matches!(
            spline.set_durations(vec![0.3, 0.0, 0.2]),
            Err(SplineError::InvalidDuration(_))
        ));
        assert_eq!(spline, before);

        let mut nodes = spline.nodes().to_vec();
        nodes.pop();
        assert!(spline.set_nodes(nodes).is_err());
        assert_eq!(spline, before);
    }

    #[test]
    fn test_segment_lookup() {
        let spline = test_spline();
        assert_eq!(spline.segment_at(0.0).unwrap().0, 0);
        // A boundary belongs to the earlier segment.
        assert_eq!(spline.segment_at(0.3).unwrap().0, 0);
        let (id, tau) = spline.segment_at(0.4).unwrap();
        assert_eq!(id, 1);
        assert_relative_eq!(tau, 0.1, epsilon = 1e-12);
        assert_eq!(spline.segment_at(1.0).unwrap().0, 2);
    }

    #[test]
    fn test_out_of_range_time_is_an_error() {
        let spline = test_spline();
        assert!(matches!(
            spline.state_at(1.1),
            Err(SplineError::TimeOutOfRange { .. })
        ));
        assert!(spline.state_at(-0.01).is_err());
        assert!(spline.state_at(f64::NAN).is_err());
    }

    #[test]
    fn test_node_jacobian_matches_finite_differences() {
        let spline = test_spline();
        let t = 0.65;

        for dx in [Dx::Pos, Dx::Vel, Dx::Acc] {
            let analytic = spline.node_jacobian(t, dx).unwrap();
            for col in 0..spline.node_count() * VALUES_PER_NODE {
                let eval = |h: f64| {
                    let mut nodes = spline.nodes().to_vec();
                    let node = col / VALUES_PER_NODE;
                    let entry = if col % VALUES_PER_NODE < DIM {
                        NodeEntry::Value
                    } else {
                        NodeEntry::Derivative
                    };
                    nodes[node].get_mut(entry)[col % DIM] += h;
                    let mut perturbed = spline.clone();
                    perturbed.set_nodes(nodes).unwrap();
                    *perturbed.state_at(t).unwrap().get(dx)
                };
                let numeric = (eval(FD_STEP) - eval(-FD_STEP)) / (2.0 * FD_STEP);
                for dim in 0..DIM {
                    assert_relative_eq!(analytic[(dim, col)], numeric[dim], epsilon = 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_segment_duration_jacobian_matches_finite_differences() {
        let spline = test_spline();
        let t = 0.65;

        for dx in [Dx::Pos, Dx::Vel, Dx::Acc] {
            let analytic = spline.segment_duration_jacobian(t, dx).unwrap();
            for seg in 0..spline.segment_count() {
                let eval = |h: f64| {
                    let mut durations = spline.durations().to_vec();
                    durations[seg] += h;
                    let mut perturbed = spline.clone();
                    perturbed.set_durations(durations).unwrap();
                    *perturbed.state_at(t).unwrap().get(dx)
                };
                let numeric = (eval(FD_STEP) - eval(-FD_STEP)) / (2.0 * FD_STEP);
                for dim in 0..DIM {
                    assert_relative_eq!(analytic[(dim, seg)], numeric[dim], epsilon = 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_node_value_layout() {
        let spline = test_spline();
        assert_relative_eq!(spline.node_value(6 + 2).unwrap(), 0.55);
        assert_relative_eq!(spline.node_value(6 + 3).unwrap(), 0.3);
        assert!(spline.node_value(4 * VALUES_PER_NODE).is_err());
    }
}
