//! Kinematic box: each endeffector stays near its nominal stance.
//!
//! `p_ee − (p_base + R(e)·nominal) ∈ [−max_deviation, max_deviation]`,
//! evaluated in world coordinates at every instant.

use legged_splines::Dx;
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::constraints::add_rows;
use crate::constraints::time_discretization::InstantConstraint;
use crate::error::NlpResult;
use crate::variables::angular_state_converter::{rotation_matrix, rotation_matrix_derivative};
use crate::variables::{ee_motion, Bounds, SetId, VariableContainer, BASE_ANG, BASE_LIN};

/// Instant hook of the range-of-motion constraint.
#[derive(Debug, Clone)]
pub struct RangeOfMotionBox {
    nominal_stance: Vec<Vector3<f64>>,
    max_deviation: Vector3<f64>,
}

impl RangeOfMotionBox {
    pub fn new(nominal_stance: Vec<Vector3<f64>>, max_deviation: Vector3<f64>) -> Self {
        Self {
            nominal_stance,
            max_deviation,
        }
    }

    fn ee_count(&self) -> usize {
        self.nominal_stance.len()
    }
}

impl InstantConstraint for RangeOfMotionBox {
    type Context = ();

    fn name(&self) -> &str {
        "range-of-motion"
    }

    fn rows_per_instant(&self) -> usize {
        3 * self.ee_count()
    }

    fn context(&self) -> Self::Context {}

    fn constraint_at_instant(
        &self,
        _ctx: &mut (),
        vars: &VariableContainer,
        t: f64,
        _k: usize,
    ) -> NlpResult<DVector<f64>> {
        let base = vars.nodes(BASE_LIN)?.state_at(t)?.p;
        let rotation = rotation_matrix(&vars.nodes(BASE_ANG)?.state_at(t)?.p);

        let mut values = DVector::zeros(self.rows_per_instant());
        for (ee, nominal) in self.nominal_stance.iter().enumerate() {
            let foot = vars.nodes(&ee_motion(ee))?.state_at(t)?.p;
            values
                .fixed_rows_mut::<3>(3 * ee)
                .copy_from(&(foot - base - rotation * nominal));
        }
        Ok(values)
    }

    fn bounds_at_instant(&self, _t: f64, _k: usize) -> Vec<Bounds> {
        (0..self.ee_count())
            .flat_map(|_| {
                self.max_deviation
                    .iter()
                    .map(|d| Bounds::symmetric(*d))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    fn depends_on(&self, set: &str) -> bool {
        match SetId::parse(set) {
            Some(SetId::BaseLinear | SetId::BaseAngular) => true,
            Some(SetId::EeMotion(ee) | SetId::EeSchedule(ee)) => ee < self.ee_count(),
            _ => false,
        }
    }

    fn jacobian_at_instant(
        &self,
        _ctx: &mut (),
        vars: &VariableContainer,
        t: f64,
        _k: usize,
        set: &str,
    ) -> NlpResult<DMatrix<f64>> {
        let mut jac = DMatrix::zeros(self.rows_per_instant(), vars.set_len(set)?);

        match SetId::parse(set) {
            Some(SetId::BaseLinear) => {
                let base = vars.nodes(BASE_LIN)?.jacobian_wrt_nodes(t, Dx::Pos)?;
                for ee in 0..self.ee_count() {
                    add_rows(&mut jac, 3 * ee, &base, -1.0);
                }
            }
            Some(SetId::BaseAngular) => {
                let euler_values = vars.nodes(BASE_ANG)?;
                let euler = euler_values.state_at(t)?.p;
                let j_euler = euler_values.jacobian_wrt_nodes(t, Dx::Pos)?;
                for (ee, nominal) in self.nominal_stance.iter().enumerate() {
                    let d_rotated = Matrix3::from_columns(&[
                        rotation_matrix_derivative(&euler, 0)? * nominal,
                        rotation_matrix_derivative(&euler, 1)? * nominal,
                        rotation_matrix_derivative(&euler, 2)? * nominal,
                    ]);
                    let block = DMatrix::from_column_slice(3, 3, d_rotated.as_slice()) * &j_euler;
                    add_rows(&mut jac, 3 * ee, &block, -1.0);
                }
            }
            Some(SetId::EeMotion(ee)) if ee < self.ee_count() => {
                let motion = vars.nodes(set)?.jacobian_wrt_nodes(t, Dx::Pos)?;
                add_rows(&mut jac, 3 * ee, &motion, 1.0);
            }
            Some(SetId::EeSchedule(ee)) if ee < self.ee_count() => {
                let motion = vars.nodes(&ee_motion(ee))?;
                let block = motion.jacobian_wrt_phase_durations(t, Dx::Pos)?;
                add_rows(&mut jac, 3 * ee, &block, 1.0);
            }
            _ => {}
        }
        Ok(jac)
    }
}
