//! Dynamic models: the contract the dynamic constraint evaluates against.
//!
//! A model is stateful. [`DynamicModel::set_current_state`] stores the
//! full kinematic and force state of one instant; residual and Jacobian
//! queries then read that state until the next call. Callers that share a
//! model across instants must therefore key their own cache on the instant,
//! and parallel callers need one model per worker (see
//! [`DynamicModel::boxed_clone`]).

use std::fmt;

use legged_splines::CurveState;
use nalgebra::{Matrix6x3, Vector3, Vector6};

use crate::error::NlpResult;

pub mod centroidal;

pub use centroidal::CentroidalModel;

/// Quantity a residual partial is taken against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateQuantity {
    BaseLinPos,
    BaseLinVel,
    BaseLinAcc,
    BaseAngVel,
    BaseAngAcc,
    EeForce(usize),
    EeMotion(usize),
}

/// Everything a model needs to know about one instant.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DynamicState {
    pub base_lin: CurveState,
    /// World-frame angular velocity
    pub base_ang_vel: Vector3<f64>,
    /// World-frame angular acceleration
    pub base_ang_acc: Vector3<f64>,
    pub ee_forces: Vec<Vector3<f64>>,
    pub ee_positions: Vec<Vector3<f64>>,
}

impl DynamicState {
    pub fn is_finite(&self) -> bool {
        let finite = |v: &Vector3<f64>| v.iter().all(|x| x.is_finite());
        finite(&self.base_lin.p)
            && finite(&self.base_lin.v)
            && finite(&self.base_lin.a)
            && finite(&self.base_ang_vel)
            && finite(&self.base_ang_acc)
            && self.ee_forces.iter().all(finite)
            && self.ee_positions.iter().all(finite)
    }
}

/// Rigid-body dynamics evaluated at one instant.
///
/// The residual has six rows: 0–2 linear, 3–5 angular.
pub trait DynamicModel: fmt::Debug + Send + Sync {
    /// Store the state that subsequent queries refer to.
    fn set_current_state(&mut self, state: DynamicState) -> NlpResult<()>;

    /// Dynamics residual at the stored state; zero when feasible.
    fn dynamics_residual(&self) -> NlpResult<Vector6<f64>>;

    /// Partial of the residual w.r.t. one 3-D state quantity.
    fn jacobian_wrt(&self, quantity: StateQuantity) -> NlpResult<Matrix6x3<f64>>;

    fn ee_count(&self) -> usize;

    /// Independent copy, used to give each worker its own cache.
    fn boxed_clone(&self) -> Box<dyn DynamicModel>;
}

impl Clone for Box<dyn DynamicModel> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}
