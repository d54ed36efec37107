//! Node-value variable sets backed by a [`NodeSpline`].
//!
//! The spline stores six scalars per node (value and derivative in three
//! dimensions). Only some of them are decision variables: the index map
//! links every stored scalar to an optimization index, to nothing (fixed),
//! or to an index shared with another node.
//!
//! Two layouts exist. The uniform layout optimizes every stored scalar and
//! splits the horizon into equal segments; it backs the base splines. The
//! phase-based layout lets segment durations follow a contact schedule:
//!
//! - motion: a contact phase is one constant polynomial, so its two nodes
//!   share position variables and their velocities are fixed to zero;
//!   a swing phase has `polys_per_swing` free polynomials
//! - force: a swing phase is one polynomial fixed at zero; a contact phase
//!   has `polys_per_stance` polynomials whose nodes are bounded by the
//!   friction-free force box

use legged_splines::{
    CurveState, Dx, Node, NodeEntry, NodeSpline, Side, DIM, VALUES_PER_NODE,
};
use nalgebra::{DMatrix, DVector, Vector3};

use crate::error::{NlpError, NlpResult};
use crate::variables::contact_schedule::{is_contact_phase, phase_at};
use crate::variables::{Bounds, ContactSchedule};

#[derive(Debug, Clone, PartialEq)]
enum Layout {
    Uniform,
    Phased {
        phase_durations: Vec<f64>,
        polys_per_phase: Vec<usize>,
        in_contact_at_start: bool,
    },
}

/// Spline nodes exposed to the solver as a flat value vector.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeValues {
    spline: NodeSpline,
    /// Stored scalar (`node * 6 + entry * 3 + dim`) to optimization index
    index_map: Vec<Option<usize>>,
    /// Optimization index to every stored scalar it drives
    opt_to_stored: Vec<Vec<usize>>,
    bounds: Vec<Bounds>,
    layout: Layout,
}

fn stored_index(node: usize, entry: NodeEntry, dim: usize) -> usize {
    node * VALUES_PER_NODE + entry.offset() + dim
}

fn entry_of(stored: usize) -> NodeEntry {
    if stored % VALUES_PER_NODE < DIM {
        NodeEntry::Value
    } else {
        NodeEntry::Derivative
    }
}

struct IndexBuilder {
    index_map: Vec<Option<usize>>,
    opt_to_stored: Vec<Vec<usize>>,
    bounds: Vec<Bounds>,
}

impl IndexBuilder {
    fn new(node_count: usize) -> Self {
        Self {
            index_map: vec![None; node_count * VALUES_PER_NODE],
            opt_to_stored: Vec::new(),
            bounds: Vec::new(),
        }
    }

    fn add(&mut self, node: usize, entry: NodeEntry, dim: usize, bounds: Bounds) {
        let stored = stored_index(node, entry, dim);
        self.index_map[stored] = Some(self.opt_to_stored.len());
        self.opt_to_stored.push(vec![stored]);
        self.bounds.push(bounds);
    }

    /// Reuse the optimization index of the same entry of `from_node`.
    fn share(&mut self, node: usize, entry: NodeEntry, dim: usize, from_node: usize) {
        let stored = stored_index(node, entry, dim);
        if let Some(id) = self.index_map[stored_index(from_node, entry, dim)] {
            self.index_map[stored] = Some(id);
            self.opt_to_stored[id].push(stored);
        }
    }
}

/// Split each phase into its polynomials of equal duration.
fn segment_durations(phase_durations: &[f64], polys_per_phase: &[usize]) -> Vec<f64> {
    phase_durations
        .iter()
        .zip(polys_per_phase)
        .flat_map(|(&d, &n)| std::iter::repeat(d / n as f64).take(n))
        .collect()
}

fn segment_contact_flags(polys_per_phase: &[usize], in_contact_at_start: bool) -> Vec<bool> {
    polys_per_phase
        .iter()
        .enumerate()
        .flat_map(|(phase, &n)| {
            std::iter::repeat(is_contact_phase(in_contact_at_start, phase)).take(n)
        })
        .collect()
}

impl NodeValues {
    /// Every stored scalar is a free variable; segments share `total_duration` equally.
    pub fn uniform(nodes: Vec<Node>, total_duration: f64) -> NlpResult<Self> {
        let node_count = nodes.len();
        let spline = NodeSpline::uniform(nodes, total_duration)?;
        let mut builder = IndexBuilder::new(node_count);
        for node in 0..node_count {
            for entry in NodeEntry::ALL {
                for dim in 0..DIM {
                    builder.add(node, entry, dim, Bounds::UNBOUNDED);
                }
            }
        }
        Ok(Self::from_parts(spline, builder, Layout::Uniform))
    }

    /// Endeffector motion following `schedule`.
    pub fn phased_motion(
        initial_position: Vector3<f64>,
        schedule: &ContactSchedule,
        polys_per_swing: usize,
    ) -> NlpResult<Self> {
        let polys: Vec<usize> = (0..schedule.phase_count())
            .map(|phase| {
                if schedule.is_contact_phase(phase) {
                    1
                } else {
                    polys_per_swing.max(1)
                }
            })
            .collect();
        let in_contact = segment_contact_flags(&polys, schedule.in_contact_at_start());
        let node_count = in_contact.len() + 1;

        let nodes = vec![Node::new(initial_position, Vector3::zeros()); node_count];
        let spline = NodeSpline::new(nodes, segment_durations(schedule.durations(), &polys))?;

        let mut builder = IndexBuilder::new(node_count);
        for node in 0..node_count {
            let ends_stance = node.checked_sub(1).is_some_and(|s| in_contact[s]);
            let starts_stance = in_contact.get(node).copied().unwrap_or(false);
            for dim in 0..DIM {
                if ends_stance {
                    builder.share(node, NodeEntry::Value, dim, node - 1);
                } else {
                    builder.add(node, NodeEntry::Value, dim, Bounds::UNBOUNDED);
                }
                if !(ends_stance || starts_stance) {
                    builder.add(node, NodeEntry::Derivative, dim, Bounds::UNBOUNDED);
                }
            }
        }

        let layout = Layout::Phased {
            phase_durations: schedule.durations().to_vec(),
            polys_per_phase: polys,
            in_contact_at_start: schedule.in_contact_at_start(),
        };
        Ok(Self::from_parts(spline, builder, layout))
    }

    /// Endeffector contact force following `schedule`.
    pub fn phased_force(
        initial_force: Vector3<f64>,
        schedule: &ContactSchedule,
        polys_per_stance: usize,
        max_normal_force: f64,
    ) -> NlpResult<Self> {
        let polys: Vec<usize> = (0..schedule.phase_count())
            .map(|phase| {
                if schedule.is_contact_phase(phase) {
                    polys_per_stance.max(1)
                } else {
                    1
                }
            })
            .collect();
        let in_contact = segment_contact_flags(&polys, schedule.in_contact_at_start());
        let node_count = in_contact.len() + 1;

        let touches_swing = |node: usize| {
            let before = node.checked_sub(1).is_some_and(|s| !in_contact[s]);
            let after = in_contact.get(node).is_some_and(|c| !c);
            before || after
        };

        let nodes = (0..node_count)
            .map(|node| {
                let value = if touches_swing(node) {
                    Vector3::zeros()
                } else {
                    initial_force
                };
                Node::new(value, Vector3::zeros())
            })
            .collect();
        let spline = NodeSpline::new(nodes, segment_durations(schedule.durations(), &polys))?;

        let mut builder = IndexBuilder::new(node_count);
        for node in (0..node_count).filter(|&n| !touches_swing(n)) {
            for dim in 0..DIM {
                let value_bounds = if dim == 2 {
                    Bounds::new(0.0, max_normal_force)
                } else {
                    Bounds::new(-max_normal_force, max_normal_force)
                };
                builder.add(node, NodeEntry::Value, dim, value_bounds);
            }
            for dim in 0..DIM {
                builder.add(node, NodeEntry::Derivative, dim, Bounds::UNBOUNDED);
            }
        }

        let layout = Layout::Phased {
            phase_durations: schedule.durations().to_vec(),
            polys_per_phase: polys,
            in_contact_at_start: schedule.in_contact_at_start(),
        };
        Ok(Self::from_parts(spline, builder, layout))
    }

    fn from_parts(spline: NodeSpline, builder: IndexBuilder, layout: Layout) -> Self {
        Self {
            spline,
            index_map: builder.index_map,
            opt_to_stored: builder.opt_to_stored,
            bounds: builder.bounds,
            layout,
        }
    }

    /// Number of optimization variables.
    pub fn len(&self) -> usize {
        self.opt_to_stored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opt_to_stored.is_empty()
    }

    pub fn spline(&self) -> &NodeSpline {
        &self.spline
    }

    pub fn node_count(&self) -> usize {
        self.spline.node_count()
    }

    pub fn total_duration(&self) -> f64 {
        self.spline.total_duration()
    }

    pub fn state_at(&self, t: f64) -> NlpResult<CurveState> {
        Ok(self.spline.state_at(t)?)
    }

    pub fn bounds(&self) -> &[Bounds] {
        &self.bounds
    }

    pub fn values(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.len(),
            self.opt_to_stored
                .iter()
                .map(|stored| self.stored_value(stored[0])),
        )
    }

    fn stored_value(&self, stored: usize) -> f64 {
        let node = &self.spline.nodes()[stored / VALUES_PER_NODE];
        node.get(entry_of(stored))[stored % DIM]
    }

    pub fn set_values(&mut self, values: &[f64]) -> NlpResult<()> {
        if values.len() != self.len() {
            return Err(NlpError::DimensionMismatch {
                expected: self.len(),
                actual: values.len(),
                context: "node values".to_string(),
            });
        }
        let mut nodes = self.spline.nodes().to_vec();
        for (stored_list, &value) in self.opt_to_stored.iter().zip(values) {
            for &stored in stored_list {
                nodes[stored / VALUES_PER_NODE].get_mut(entry_of(stored))[stored % DIM] = value;
            }
        }
        self.spline.set_nodes(nodes)?;
        Ok(())
    }

    /// Optimization index of one stored scalar, `None` when it is fixed.
    pub fn opt_index(&self, node: usize, entry: NodeEntry, dim: usize) -> Option<usize> {
        self.index_map
            .get(stored_index(node, entry, dim))
            .copied()
            .flatten()
    }

    /// `(optimization index, dimension)` of every variable that is a node value
    /// rather than a node derivative.
    pub fn value_indices(&self) -> Vec<(usize, usize)> {
        self.opt_to_stored
            .iter()
            .enumerate()
            .filter(|(_, stored)| entry_of(stored[0]) == NodeEntry::Value)
            .map(|(id, stored)| (id, stored[0] % DIM))
            .collect()
    }

    /// `3 × len()` Jacobian of quantity `dx` at `t` w.r.t. the optimization variables.
    pub fn jacobian_wrt_nodes(&self, t: f64, dx: Dx) -> NlpResult<DMatrix<f64>> {
        let weights = self.spline.node_weights(t, dx)?;
        let mut jac = DMatrix::zeros(DIM, self.len());
        for side in [Side::Start, Side::End] {
            let node = weights.node_id(side);
            for entry in NodeEntry::ALL {
                let w = weights.weight(side, entry);
                for dim in 0..DIM {
                    if let Some(id) = self.index_map[stored_index(node, entry, dim)] {
                        jac[(dim, id)] += w;
                    }
                }
            }
        }
        Ok(jac)
    }

    /// `3 × phases` Jacobian of quantity `dx` at `t` w.r.t. the phase durations.
    /// Empty for the uniform layout.
    pub fn jacobian_wrt_phase_durations(&self, t: f64, dx: Dx) -> NlpResult<DMatrix<f64>> {
        let Layout::Phased {
            polys_per_phase, ..
        } = &self.layout
        else {
            return Ok(DMatrix::zeros(DIM, 0));
        };

        let segment_jac = self.spline.segment_duration_jacobian(t, dx)?;
        let mut jac = DMatrix::zeros(DIM, polys_per_phase.len());
        let mut segment = 0;
        for (phase, &n) in polys_per_phase.iter().enumerate() {
            for _ in 0..n {
                for dim in 0..DIM {
                    jac[(dim, phase)] += segment_jac[(dim, segment)] / n as f64;
                }
                segment += 1;
            }
        }
        Ok(jac)
    }

    /// Push new phase durations into the segment durations.
    pub fn update_phase_durations(&mut self, durations: &[f64]) -> NlpResult<()> {
        let Layout::Phased {
            phase_durations,
            polys_per_phase,
            ..
        } = &mut self.layout
        else {
            return Err(NlpError::InvalidInput(
                "uniform node values have no phase durations".to_string(),
            ));
        };
        if durations.len() != phase_durations.len() {
            return Err(NlpError::DimensionMismatch {
                expected: phase_durations.len(),
                actual: durations.len(),
                context: "phase durations".to_string(),
            });
        }
        let segments = segment_durations(durations, polys_per_phase);
        self.spline.set_durations(segments)?;
        phase_durations.copy_from_slice(durations);
        Ok(())
    }

    pub fn phase_durations(&self) -> Option<&[f64]> {
        match &self.layout {
            Layout::Phased {
                phase_durations, ..
            } => Some(phase_durations),
            Layout::Uniform => None,
        }
    }

    pub fn phase_count(&self) -> usize {
        self.phase_durations().map_or(0, <[f64]>::len)
    }

    pub fn is_contact_phase(&self, phase: usize) -> bool {
        match &self.layout {
            Layout::Phased {
                in_contact_at_start,
                ..
            } => is_contact_phase(*in_contact_at_start, phase),
            Layout::Uniform => false,
        }
    }

    /// Contact flag at `t`, `None` for the uniform layout.
    pub fn in_contact_at(&self, t: f64) -> Option<bool> {
        let durations = self.phase_durations()?;
        Some(self.is_contact_phase(phase_at(durations, t)))
    }

    /// First and last node of `phase`.
    pub fn phase_node_range(&self, phase: usize) -> Option<(usize, usize)> {
        let Layout::Phased {
            polys_per_phase, ..
        } = &self.layout
        else {
            return None;
        };
        let n = *polys_per_phase.get(phase)?;
        let first: usize = polys_per_phase[..phase].iter().sum();
        Some((first, first + n))
    }

    /// Whether `node` bounds a contact polynomial.
    pub fn node_in_contact(&self, node: usize) -> bool {
        let Layout::Phased {
            polys_per_phase,
            in_contact_at_start,
            ..
        } = &self.layout
        else {
            return false;
        };
        let flags = segment_contact_flags(polys_per_phase, *in_contact_at_start);
        let before = node.checked_sub(1).is_some_and(|s| flags[s]);
        let after = flags.get(node).copied().unwrap_or(false);
        before || after
    }

    /// Node value (position or force) of node `node`.
    pub fn node_value(&self, node: usize) -> Option<Vector3<f64>> {
        self.spline.nodes().get(node).map(|n| n.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const FD_STEP: f64 = 1e-6;

    fn test_schedule() -> ContactSchedule {
        ContactSchedule::new(vec![0.4, 0.2, 0.4], true, 0.1, 1.0).unwrap()
    }

    fn scrambled(values: &mut NodeValues) {
        let x: Vec<f64> = (0..values.len())
            .map(|i| (i as f64 * 0.37 + 0.2).sin())
            .collect();
        values.set_values(&x).unwrap();
    }

    #[test]
    fn test_uniform_layout_optimizes_everything() {
        let nodes = vec![Node::default(); 4];
        let values = NodeValues::uniform(nodes, 1.5).unwrap();
        assert_eq!(values.len(), 24);
        assert_relative_eq!(values.spline().durations()[1], 0.5);
        assert_eq!(values.phase_durations(), None);
        assert_eq!(values.jacobian_wrt_phase_durations(0.3, Dx::Pos).unwrap().ncols(), 0);
    }

    #[test]
    fn test_motion_layout_shares_stance_positions() {
        let values = NodeValues::phased_motion(Vector3::zeros(), &test_schedule(), 2).unwrap();
        // nodes: stance start/end share 3, swing middle 6, last stance shares 3
        assert_eq!(values.node_count(), 5);
        assert_eq!(values.len(), 12);
        assert_eq!(
            values.opt_index(0, NodeEntry::Value, 1),
            values.opt_index(1, NodeEntry::Value, 1)
        );
        assert_eq!(values.opt_index(1, NodeEntry::Derivative, 0), None);
        assert!(values.opt_index(2, NodeEntry::Derivative, 0).is_some());
        assert!(values.node_in_contact(1));
        assert!(!values.node_in_contact(2));
        assert_eq!(values.phase_node_range(1), Some((1, 3)));
    }

    #[test]
    fn test_motion_is_constant_during_stance() {
        let mut values = NodeValues::phased_motion(Vector3::zeros(), &test_schedule(), 2).unwrap();
        scrambled(&mut values);
        let start = values.state_at(0.0).unwrap();
        let mid_stance = values.state_at(0.25).unwrap();
        assert_relative_eq!(start.p, mid_stance.p, epsilon = 1e-12);
        assert_relative_eq!(mid_stance.v, Vector3::zeros(), epsilon = 1e-12);
        assert_eq!(values.in_contact_at(0.25), Some(true));
        assert_eq!(values.in_contact_at(0.5), Some(false));
    }

    #[test]
    fn test_force_is_zero_during_swing() {
        let mut values =
            NodeValues::phased_force(Vector3::new(0.0, 0.0, 100.0), &test_schedule(), 3, 1000.0)
                .unwrap();
        // 8 nodes, the two touching the swing phase are fixed
        assert_eq!(values.node_count(), 8);
        assert_eq!(values.len(), 36);
        scrambled(&mut values);
        assert_relative_eq!(values.state_at(0.5).unwrap().p, Vector3::zeros(), epsilon = 1e-12);

        let bounds = values.bounds();
        assert_eq!(bounds[2], Bounds::new(0.0, 1000.0));
        assert_eq!(bounds[0], Bounds::new(-1000.0, 1000.0));
        assert_eq!(bounds[3], Bounds::UNBOUNDED);
        assert_eq!(values.value_indices().len(), 18);
    }

    #[test]
    fn test_values_round_trip_through_shared_indices() {
        let mut values = NodeValues::phased_motion(Vector3::zeros(), &test_schedule(), 2).unwrap();
        let x: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
        values.set_values(&x).unwrap();
        assert_eq!(values.values().as_slice(), x.as_slice());
        assert!(values.set_values(&x[1..]).is_err());
    }

    #[test]
    fn test_node_jacobian_matches_finite_differences() {
        let mut values = NodeValues::phased_motion(Vector3::zeros(), &test_schedule(), 2).unwrap();
        scrambled(&mut values);
        let x = values.values();

        for &t in &[0.2, 0.47, 0.55, 0.9] {
            for dx in [Dx::Pos, Dx::Vel, Dx::Acc] {
                let analytic = values.jacobian_wrt_nodes(t, dx).unwrap();
                for col in 0..values.len() {
                    let eval = |h: f64| {
                        let mut perturbed = values.clone();
                        let mut y = x.clone();
                        y[col] += h;
                        perturbed.set_values(y.as_slice()).unwrap();
                        *perturbed.state_at(t).unwrap().get(dx)
                    };
                    let numeric = (eval(FD_STEP) - eval(-FD_STEP)) / (2.0 * FD_STEP);
                    for dim in 0..DIM {
                        assert_relative_eq!(analytic[(dim, col)], numeric[dim], epsilon = 1e-5);
                    }
                }
            }
        }
    }

    #[test]
    fn test_phase_duration_jacobian_matches_finite_differences() {
        let mut values = NodeValues::phased_motion(Vector3::zeros(), &test_schedule(), 2).unwrap();
        scrambled(&mut values);
        let durations = values.phase_durations().unwrap().to_vec();

        for &t in &[0.45, 0.55, 0.8] {
            for dx in [Dx::Pos, Dx::Vel] {
                let analytic = values.jacobian_wrt_phase_durations(t, dx).unwrap();
                for phase in 0..durations.len() {
                    let eval = |h: f64| {
                        let mut perturbed = values.clone();
                        let mut d = durations.clone();
                        d[phase] += h;
                        perturbed.update_phase_durations(&d).unwrap();
                        *perturbed.state_at(t).unwrap().get(dx)
                    };
                    let numeric = (eval(FD_STEP) - eval(-FD_STEP)) / (2.0 * FD_STEP);
                    for dim in 0..DIM {
                        assert_relative_eq!(
                            analytic[(dim, phase)],
                            numeric[dim],
                            epsilon = 1e-4
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_uniform_values_reject_phase_updates() {
        let mut values = NodeValues::uniform(vec![Node::default(); 3], 1.0).unwrap();
        assert!(values.update_phase_durations(&[0.5, 0.5]).is_err());
    }
}
