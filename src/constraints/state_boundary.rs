//! Initial and final base state, initial endeffector positions.

use legged_splines::Dx;
use nalgebra::{DMatrix, DVector, Vector3};

use crate::constraints::{add_rows, Constraint};
use crate::error::NlpResult;
use crate::variables::{
    ee_motion, read_variables, BaseState, Bounds, SetId, SharedVariables, VariableContainer,
    BASE_ANG, BASE_LIN,
};

/// One 3-row equality `quantity(set, t) = target`.
#[derive(Debug, Clone)]
struct Term {
    set: String,
    t: f64,
    dx: Dx,
    target: Vector3<f64>,
}

/// Pins the base at both ends of the horizon and the feet at the start.
pub struct StateBoundaryConstraint {
    variables: SharedVariables,
    terms: Vec<Term>,
}

impl StateBoundaryConstraint {
    pub fn new(
        variables: SharedVariables,
        horizon: f64,
        initial_base: &BaseState,
        final_base: &BaseState,
        initial_ee_positions: &[Vector3<f64>],
    ) -> Self {
        let mut terms = Vec::new();
        for (t, base) in [(0.0, initial_base), (horizon, final_base)] {
            for (set, state) in [(BASE_LIN, &base.lin), (BASE_ANG, &base.ang)] {
                for dx in [Dx::Pos, Dx::Vel] {
                    terms.push(Term {
                        set: set.to_string(),
                        t,
                        dx,
                        target: *state.get(dx),
                    });
                }
            }
        }
        for (ee, position) in initial_ee_positions.iter().enumerate() {
            terms.push(Term {
                set: ee_motion(ee),
                t: 0.0,
                dx: Dx::Pos,
                target: *position,
            });
        }
        Self { variables, terms }
    }

    fn term_jacobian(
        vars: &VariableContainer,
        term: &Term,
        set: &str,
    ) -> NlpResult<Option<DMatrix<f64>>> {
        if term.set == set {
            return Ok(Some(vars.nodes(set)?.jacobian_wrt_nodes(term.t, term.dx)?));
        }
        if let Some(SetId::EeSchedule(ee)) = SetId::parse(set) {
            if term.set == ee_motion(ee) {
                let motion = vars.nodes(&term.set)?;
                return Ok(Some(motion.jacobian_wrt_phase_durations(term.t, term.dx)?));
            }
        }
        Ok(None)
    }
}

impl Constraint for StateBoundaryConstraint {
    fn name(&self) -> &str {
        "state-boundary"
    }

    fn rows(&self) -> usize {
        3 * self.terms.len()
    }

    fn values(&self) -> NlpResult<DVector<f64>> {
        let vars = read_variables(&self.variables)?;
        let mut values = DVector::zeros(self.rows());
        for (i, term) in self.terms.iter().enumerate() {
            let state = vars.nodes(&term.set)?.state_at(term.t)?;
            values
                .fixed_rows_mut::<3>(3 * i)
                .copy_from(&(state.get(term.dx) - term.target));
        }
        Ok(values)
    }

    fn bounds(&self) -> NlpResult<Vec<Bounds>> {
        Ok(vec![Bounds::equality(0.0); self.rows()])
    }

    fn jacobian_block(&self, set: &str) -> NlpResult<DMatrix<f64>> {
        let vars = read_variables(&self.variables)?;
        let mut jac = DMatrix::zeros(self.rows(), vars.set_len(set)?);
        for (i, term) in self.terms.iter().enumerate() {
            if let Some(block) = Self::term_jacobian(&vars, term, set)? {
                add_rows(&mut jac, 3 * i, &block, 1.0);
            }
        }
        Ok(jac)
    }

    fn variables(&self) -> &SharedVariables {
        &self.variables
    }

    fn depends_on(&self, set: &str) -> bool {
        let motion = match SetId::parse(set) {
            Some(SetId::EeSchedule(ee)) => ee_motion(ee),
            _ => set.to_string(),
        };
        self.terms.iter().any(|term| term.set == motion)
    }
}
