//! Shapes each swing: the middle node sits halfway between lift-off and
//! touch-down and moves with the average swing velocity.

use legged_splines::NodeEntry;
use nalgebra::{DMatrix, DVector, Vector2};

use crate::constraints::Constraint;
use crate::error::{NlpError, NlpResult};
use crate::variables::{ee_motion, read_variables, Bounds, NodeValues, SetId, SharedVariables};

const ROWS_PER_SWING: usize = 4;

#[derive(Debug, Clone, Copy)]
struct Swing {
    ee: usize,
    phase: usize,
    first: usize,
    mid: usize,
    last: usize,
}

pub struct SwingConstraint {
    variables: SharedVariables,
    swings: Vec<Swing>,
}

impl SwingConstraint {
    /// Swing phases split into an odd number of polynomials have no middle node
    /// and get no rows.
    pub fn new(variables: SharedVariables) -> NlpResult<Self> {
        let mut swings = Vec::new();
        {
            let vars = read_variables(&variables)?;
            for ee in 0..vars.ee_count() {
                let motion = vars.nodes(&ee_motion(ee))?;
                for phase in (0..motion.phase_count()).filter(|&p| !motion.is_contact_phase(p)) {
                    let Some((first, last)) = motion.phase_node_range(phase) else {
                        continue;
                    };
                    let polys = last - first;
                    if polys >= 2 && polys % 2 == 0 {
                        swings.push(Swing {
                            ee,
                            phase,
                            first,
                            mid: first + polys / 2,
                            last,
                        });
                    }
                }
            }
        }
        Ok(Self { variables, swings })
    }

    fn swing_duration(motion: &NodeValues, swing: &Swing) -> NlpResult<f64> {
        match motion.phase_durations().and_then(|d| d.get(swing.phase)) {
            Some(&t) if t > 0.0 => Ok(t),
            other => Err(NlpError::InvalidInput(format!(
                "swing phase {} of endeffector {} has no positive duration: {other:?}",
                swing.phase, swing.ee
            ))),
        }
    }
}

impl Constraint for SwingConstraint {
    fn name(&self) -> &str {
        "swing"
    }

    fn rows(&self) -> usize {
        ROWS_PER_SWING * self.swings.len()
    }

    fn values(&self) -> NlpResult<DVector<f64>> {
        let vars = read_variables(&self.variables)?;
        let mut values = DVector::zeros(self.rows());
        for (i, swing) in self.swings.iter().enumerate() {
            let motion = vars.nodes(&ee_motion(swing.ee))?;
            let nodes = motion.spline().nodes();
            let (first, mid, last) = (&nodes[swing.first], &nodes[swing.mid], &nodes[swing.last]);
            let t_swing = Self::swing_duration(motion, swing)?;

            let row = ROWS_PER_SWING * i;
            for dim in 0..2 {
                values[row + dim] =
                    mid.value[dim] - 0.5 * (first.value[dim] + last.value[dim]);
                values[row + 2 + dim] =
                    mid.derivative[dim] - (last.value[dim] - first.value[dim]) / t_swing;
            }
        }
        Ok(values)
    }

    fn bounds(&self) -> NlpResult<Vec<Bounds>> {
        Ok(vec![Bounds::equality(0.0); self.rows()])
    }

    fn jacobian_block(&self, set: &str) -> NlpResult<DMatrix<f64>> {
        let vars = read_variables(&self.variables)?;
        let mut jac = DMatrix::zeros(self.rows(), vars.set_len(set)?);

        match SetId::parse(set) {
            Some(SetId::EeMotion(ee)) => {
                let motion = vars.nodes(set)?;
                for (i, swing) in self.swings.iter().enumerate().filter(|(_, s)| s.ee == ee) {
                    let t_swing = Self::swing_duration(motion, swing)?;
                    let row = ROWS_PER_SWING * i;
                    for dim in 0..2 {
                        let terms = [
                            (swing.mid, NodeEntry::Value, row + dim, 1.0),
                            (swing.first, NodeEntry::Value, row + dim, -0.5),
                            (swing.last, NodeEntry::Value, row + dim, -0.5),
                            (swing.mid, NodeEntry::Derivative, row + 2 + dim, 1.0),
                            (swing.first, NodeEntry::Value, row + 2 + dim, 1.0 / t_swing),
                            (swing.last, NodeEntry::Value, row + 2 + dim, -1.0 / t_swing),
                        ];
                        for (node, entry, r, partial) in terms {
                            if let Some(col) = motion.opt_index(node, entry, dim) {
                                jac[(r, col)] += partial;
                            }
                        }
                    }
                }
            }
            Some(SetId::EeSchedule(ee)) => {
                let motion = vars.nodes(&ee_motion(ee))?;
                for (i, swing) in self.swings.iter().enumerate().filter(|(_, s)| s.ee == ee) {
                    let t_swing = Self::swing_duration(motion, swing)?;
                    let nodes = motion.spline().nodes();
                    let delta = Vector2::new(
                        nodes[swing.last].value.x - nodes[swing.first].value.x,
                        nodes[swing.last].value.y - nodes[swing.first].value.y,
                    );
                    let row = ROWS_PER_SWING * i;
                    for dim in 0..2 {
                        jac[(row + 2 + dim, swing.phase)] = delta[dim] / (t_swing * t_swing);
                    }
                }
            }
            _ => {}
        }
        Ok(jac)
    }

    fn variables(&self) -> &SharedVariables {
        &self.variables
    }

    fn depends_on(&self, set: &str) -> bool {
        match SetId::parse(set) {
            Some(SetId::EeMotion(ee) | SetId::EeSchedule(ee)) => {
                self.swings.iter().any(|swing| swing.ee == ee)
            }
            _ => false,
        }
    }
}
