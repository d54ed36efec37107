//! Dynamic feasibility: the model residual vanishes at every instant.
//!
//! At each evaluation time the full state is rebuilt from the variables
//! (base linear spline, Euler spline through the angular converter, every
//! endeffector force and motion spline) and fed to the dynamic model.
//! Jacobians follow by the chain rule `∂r/∂state · ∂state/∂set`. Schedule
//! sets enter through the duration Jacobian of the endeffector splines;
//! evaluation times themselves are treated as constants.

use legged_splines::Dx;
use nalgebra::{DMatrix, DVector, Matrix6x3};

use crate::constraints::time_discretization::{
    InstantConstraint, Sampling, TimeDiscretizationConstraint,
};
use crate::error::NlpResult;
use crate::models::{DynamicModel, DynamicState, StateQuantity};
use crate::variables::{
    ee_force, ee_motion, AngularStateConverter, Bounds, SetId, SharedVariables,
    VariableContainer, BASE_ANG, BASE_LIN,
};

/// Residual rows per instant: three linear, three angular.
pub const DYNAMIC_ROWS: usize = 6;

/// Instant hook of the dynamic constraint.
#[derive(Debug)]
pub struct DynamicConstraint {
    model: Box<dyn DynamicModel>,
    tolerance: f64,
}

/// Model copy plus the instant its stored state belongs to.
#[derive(Debug)]
pub struct DynamicContext {
    model: Box<dyn DynamicModel>,
    /// `(time bits, container revision)` of the stored state
    cache_key: Option<(u64, u64)>,
}

impl DynamicContext {
    pub fn model(&self) -> &dyn DynamicModel {
        self.model.as_ref()
    }
}

impl DynamicConstraint {
    /// `tolerance` widens the equality bounds to `[-tolerance, tolerance]`.
    pub fn new(model: Box<dyn DynamicModel>, tolerance: f64) -> Self {
        Self { model, tolerance }
    }

    /// Wrap into the time-discretization scheme.
    pub fn time_discretized(
        self,
        variables: SharedVariables,
        horizon: f64,
        sampling: Sampling,
        parallel: bool,
    ) -> NlpResult<TimeDiscretizationConstraint<Self>> {
        Ok(TimeDiscretizationConstraint::new(self, variables, horizon, sampling)?
            .with_parallel(parallel))
    }

    /// Feed the state at `t` to the context's model unless it already holds it.
    fn update_model(
        &self,
        ctx: &mut DynamicContext,
        vars: &VariableContainer,
        t: f64,
    ) -> NlpResult<()> {
        let key = (t.to_bits(), vars.revision());
        if ctx.cache_key == Some(key) {
            return Ok(());
        }
        ctx.cache_key = None;

        let base_lin = vars.nodes(BASE_LIN)?.state_at(t)?;
        let converter = AngularStateConverter::new(vars.nodes(BASE_ANG)?);
        let ee_count = ctx.model.ee_count();
        let mut ee_forces = Vec::with_capacity(ee_count);
        let mut ee_positions = Vec::with_capacity(ee_count);
        for ee in 0..ee_count {
            ee_forces.push(vars.nodes(&ee_force(ee))?.state_at(t)?.p);
            ee_positions.push(vars.nodes(&ee_motion(ee))?.state_at(t)?.p);
        }

        ctx.model.set_current_state(DynamicState {
            base_lin,
            base_ang_vel: converter.angular_velocity(t)?,
            base_ang_acc: converter.angular_acceleration(t)?,
            ee_forces,
            ee_positions,
        })?;
        ctx.cache_key = Some(key);
        Ok(())
    }
}

/// `partial (6 × 3) · jac (3 × n)`
fn chain(partial: &Matrix6x3<f64>, jac: &DMatrix<f64>) -> DMatrix<f64> {
    DMatrix::from_column_slice(DYNAMIC_ROWS, 3, partial.as_slice()) * jac
}

impl InstantConstraint for DynamicConstraint {
    type Context = DynamicContext;

    fn name(&self) -> &str {
        "dynamic"
    }

    fn rows_per_instant(&self) -> usize {
        DYNAMIC_ROWS
    }

    fn context(&self) -> DynamicContext {
        DynamicContext {
            model: self.model.boxed_clone(),
            cache_key: None,
        }
    }

    fn constraint_at_instant(
        &self,
        ctx: &mut DynamicContext,
        vars: &VariableContainer,
        t: f64,
        _k: usize,
    ) -> NlpResult<DVector<f64>> {
        self.update_model(ctx, vars, t)?;
        let residual = ctx.model.dynamics_residual()?;
        Ok(DVector::from_column_slice(residual.as_slice()))
    }

    fn bounds_at_instant(&self, _t: f64, _k: usize) -> Vec<Bounds> {
        vec![Bounds::symmetric(self.tolerance); DYNAMIC_ROWS]
    }

    fn depends_on(&self, set: &str) -> bool {
        match SetId::parse(set) {
            Some(SetId::BaseLinear | SetId::BaseAngular) => true,
            Some(SetId::EeForce(ee) | SetId::EeMotion(ee) | SetId::EeSchedule(ee)) => {
                ee < self.model.ee_count()
            }
            None => false,
        }
    }

    fn jacobian_at_instant(
        &self,
        ctx: &mut DynamicContext,
        vars: &VariableContainer,
        t: f64,
        _k: usize,
        set: &str,
    ) -> NlpResult<DMatrix<f64>> {
        let cols = vars.set_len(set)?;
        self.update_model(ctx, vars, t)?;
        let model = &ctx.model;
        let ee_count = model.ee_count();

        let jac = match SetId::parse(set) {
            Some(SetId::BaseLinear) => {
                let base = vars.nodes(BASE_LIN)?;
                chain(
                    &model.jacobian_wrt(StateQuantity::BaseLinPos)?,
                    &base.jacobian_wrt_nodes(t, Dx::Pos)?,
                ) + chain(
                    &model.jacobian_wrt(StateQuantity::BaseLinVel)?,
                    &base.jacobian_wrt_nodes(t, Dx::Vel)?,
                ) + chain(
                    &model.jacobian_wrt(StateQuantity::BaseLinAcc)?,
                    &base.jacobian_wrt_nodes(t, Dx::Acc)?,
                )
            }
            Some(SetId::BaseAngular) => {
                let converter = AngularStateConverter::new(vars.nodes(BASE_ANG)?);
                chain(
                    &model.jacobian_wrt(StateQuantity::BaseAngVel)?,
                    &converter.angular_velocity_jacobian(t)?,
                ) + chain(
                    &model.jacobian_wrt(StateQuantity::BaseAngAcc)?,
                    &converter.angular_acceleration_jacobian(t)?,
                )
            }
            Some(SetId::EeForce(ee)) if ee < ee_count => chain(
                &model.jacobian_wrt(StateQuantity::EeForce(ee))?,
                &vars.nodes(set)?.jacobian_wrt_nodes(t, Dx::Pos)?,
            ),
            Some(SetId::EeMotion(ee)) if ee < ee_count => chain(
                &model.jacobian_wrt(StateQuantity::EeMotion(ee))?,
                &vars.nodes(set)?.jacobian_wrt_nodes(t, Dx::Pos)?,
            ),
            Some(SetId::EeSchedule(ee)) if ee < ee_count => {
                let force = vars.nodes(&ee_force(ee))?;
                let motion = vars.nodes(&ee_motion(ee))?;
                chain(
                    &model.jacobian_wrt(StateQuantity::EeForce(ee))?,
                    &force.jacobian_wrt_phase_durations(t, Dx::Pos)?,
                ) + chain(
                    &model.jacobian_wrt(StateQuantity::EeMotion(ee))?,
                    &motion.jacobian_wrt_phase_durations(t, Dx::Pos)?,
                )
            }
            _ => DMatrix::zeros(DYNAMIC_ROWS, cols),
        };
        Ok(jac)
    }
}
