//! Centroidal dynamics with constant inertia.
//!
//! ```text
//! r_lin = m·(a − g) − Σ f_i                 g = (0, 0, −gravity)
//! r_ang = I·ω̇ + ω × I·ω − Σ (p_i − c) × f_i
//! ```

use nalgebra::{Matrix3, Matrix6x3, Vector3, Vector6};

use crate::error::{NlpError, NlpResult};
use crate::models::{DynamicModel, DynamicState, StateQuantity};

/// Single rigid body driven by point contact forces.
#[derive(Debug, Clone, PartialEq)]
pub struct CentroidalModel {
    mass: f64,
    inertia: Matrix3<f64>,
    gravity: f64,
    ee_count: usize,
    state: Option<DynamicState>,
}

impl CentroidalModel {
    pub fn new(mass: f64, inertia: Matrix3<f64>, ee_count: usize) -> NlpResult<Self> {
        if !(mass.is_finite() && mass > 0.0) {
            return Err(NlpError::InvalidInput(format!(
                "mass must be positive and finite, got {mass}"
            )));
        }
        if inertia.iter().any(|x| !x.is_finite()) {
            return Err(NlpError::InvalidInput(
                "inertia must be finite".to_string(),
            ));
        }
        Ok(Self {
            mass,
            inertia,
            gravity: 9.80665,
            ee_count,
            state: None,
        })
    }

    /// Single-legged hopper with 20 kg and a diagonal inertia.
    pub fn monoped() -> Self {
        Self {
            mass: 20.0,
            inertia: Matrix3::from_diagonal(&Vector3::new(1.209488, 5.5837, 6.056973)),
            gravity: 9.80665,
            ee_count: 1,
            state: None,
        }
    }

    pub fn with_gravity(mut self, gravity: f64) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn mass(&self) -> f64 {
        self.mass
    }

    pub fn inertia(&self) -> &Matrix3<f64> {
        &self.inertia
    }

    pub fn gravity(&self) -> f64 {
        self.gravity
    }

    fn state(&self) -> NlpResult<&DynamicState> {
        self.state
            .as_ref()
            .ok_or_else(|| NlpError::Model("no state set".to_string()))
    }

    fn check_ee(&self, ee: usize) -> NlpResult<()> {
        if ee < self.ee_count {
            Ok(())
        } else {
            Err(NlpError::Model(format!(
                "endeffector {ee} out of range for {} endeffectors",
                self.ee_count
            )))
        }
    }
}

fn stacked(linear: Matrix3<f64>, angular: Matrix3<f64>) -> Matrix6x3<f64> {
    let mut jac = Matrix6x3::zeros();
    jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&linear);
    jac.fixed_view_mut::<3, 3>(3, 0).copy_from(&angular);
    jac
}

impl DynamicModel for CentroidalModel {
    fn set_current_state(&mut self, state: DynamicState) -> NlpResult<()> {
        if state.ee_forces.len() != self.ee_count || state.ee_positions.len() != self.ee_count {
            return Err(NlpError::Model(format!(
                "expected {} endeffectors, got {} forces and {} positions",
                self.ee_count,
                state.ee_forces.len(),
                state.ee_positions.len()
            )));
        }
        if !state.is_finite() {
            return Err(NlpError::Model("state contains non-finite values".to_string()));
        }
        self.state = Some(state);
        Ok(())
    }

    fn dynamics_residual(&self) -> NlpResult<Vector6<f64>> {
        let s = self.state()?;
        let com = s.base_lin.p;
        let gravity = Vector3::new(0.0, 0.0, -self.gravity);

        let total_force: Vector3<f64> = s.ee_forces.iter().sum();
        let contact_moment = s
            .ee_forces
            .iter()
            .zip(&s.ee_positions)
            .fold(Vector3::zeros(), |acc, (f, p)| acc + (p - com).cross(f));

        let omega = s.base_ang_vel;
        let linear = (s.base_lin.a - gravity) * self.mass - total_force;
        let angular = self.inertia * s.base_ang_acc + omega.cross(&(self.inertia * omega))
            - contact_moment;

        let mut residual = Vector6::zeros();
        residual.fixed_rows_mut::<3>(0).copy_from(&linear);
        residual.fixed_rows_mut::<3>(3).copy_from(&angular);
        Ok(residual)
    }

    fn jacobian_wrt(&self, quantity: StateQuantity) -> NlpResult<Matrix6x3<f64>> {
        let s = self.state()?;
        let com = s.base_lin.p;
        let zero = Matrix3::zeros();

        let jac = match quantity {
            StateQuantity::BaseLinPos => {
                let sum = s
                    .ee_forces
                    .iter()
                    .fold(Matrix3::zeros(), |acc, f| acc + f.cross_matrix());
                stacked(zero, -sum)
            }
            StateQuantity::BaseLinVel => Matrix6x3::zeros(),
            StateQuantity::BaseLinAcc => stacked(Matrix3::identity() * self.mass, zero),
            StateQuantity::BaseAngVel => {
                let omega = s.base_ang_vel;
                let angular =
                    omega.cross_matrix() * self.inertia - (self.inertia * omega).cross_matrix();
                stacked(zero, angular)
            }
            StateQuantity::BaseAngAcc => stacked(zero, self.inertia),
            StateQuantity::EeForce(ee) => {
                self.check_ee(ee)?;
                let lever = s.ee_positions[ee] - com;
                stacked(-Matrix3::identity(), -lever.cross_matrix())
            }
            StateQuantity::EeMotion(ee) => {
                self.check_ee(ee)?;
                stacked(zero, s.ee_forces[ee].cross_matrix())
            }
        };
        Ok(jac)
    }

    fn ee_count(&self) -> usize {
        self.ee_count
    }

    fn boxed_clone(&self) -> Box<dyn DynamicModel> {
        Box::new(self.clone())
    }
}
