//! Integration tests for the time-discretized dynamic constraint
//!
//! Covers the analytic Jacobian of every variable set against central
//! differences, the row layout, the per-instant model cache and the way
//! evaluation times follow an optimized contact schedule.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use approx::assert_relative_eq;
use nalgebra::{Matrix6x3, Vector6};

use legged_nlp::constraints::time_discretization::uniform_times;
use legged_nlp::constraints::{Constraint, DynamicConstraint, Sampling};
use legged_nlp::models::{CentroidalModel, DynamicModel, DynamicState, StateQuantity};
use legged_nlp::variables::{read_variables, write_variables, BASE_LIN};
use legged_nlp::{MotionParameters, NlpResult};

mod formulation_test_utils;
use formulation_test_utils::*;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Centroidal model that counts how often a new state is pushed into it.
#[derive(Debug, Clone)]
struct CountingModel {
    inner: CentroidalModel,
    updates: Arc<AtomicUsize>,
}

impl DynamicModel for CountingModel {
    fn set_current_state(&mut self, state: DynamicState) -> NlpResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.inner.set_current_state(state)
    }

    fn dynamics_residual(&self) -> NlpResult<Vector6<f64>> {
        self.inner.dynamics_residual()
    }

    fn jacobian_wrt(&self, quantity: StateQuantity) -> NlpResult<Matrix6x3<f64>> {
        self.inner.jacobian_wrt(quantity)
    }

    fn ee_count(&self) -> usize {
        self.inner.ee_count()
    }

    fn boxed_clone(&self) -> Box<dyn DynamicModel> {
        Box::new(self.clone())
    }
}

#[test]
fn test_dynamic_jacobian_matches_finite_differences() -> TestResult {
    let params = MotionParameters::default().with_optimize_timings(true);
    let vars = monoped_variables(&params);
    perturb_nodes(&vars);

    let constraint = DynamicConstraint::new(Box::new(CentroidalModel::monoped()), 0.0)
        .time_discretized(
            vars.clone(),
            params.total_duration,
            Sampling::Fixed(SMOOTH_TIMES.to_vec()),
            false,
        )?;
    assert_eq!(constraint.rows(), 6 * SMOOTH_TIMES.len());

    let names = read_variables(&vars)?.names().to_vec();
    assert_eq!(names.len(), 5);
    for name in &names {
        let analytic = constraint.jacobian_block(name)?;
        let numeric = numeric_jacobian(&vars, name, || constraint.values().unwrap());
        let error = max_relative_error(&analytic, &numeric);
        assert!(error < 1e-4, "Jacobian w.r.t. {name} off by {error:.3e}");
    }
    Ok(())
}

#[test]
fn test_parallel_evaluation_matches_serial() -> TestResult {
    let params = MotionParameters::default().with_optimize_timings(true);
    let vars = monoped_variables(&params);
    perturb_nodes(&vars);
    let times = uniform_times(params.total_duration, 0.05)?;

    let build = |parallel| {
        DynamicConstraint::new(Box::new(CentroidalModel::monoped()), 0.0).time_discretized(
            vars.clone(),
            params.total_duration,
            Sampling::Fixed(times.clone()),
            parallel,
        )
    };
    let serial = build(false)?;
    let parallel = build(true)?;

    assert_eq!(serial.values()?, parallel.values()?);
    assert_eq!(serial.jacobian()?, parallel.jacobian()?);
    Ok(())
}

#[test]
fn test_zero_force_leaves_gravity_in_residual() -> TestResult {
    let params = MotionParameters::default();
    let start = start_state();
    let vars = legged_nlp::variables::build_variables(&params, &start, &start, &initial_feet())?
        .into_shared();

    // t = 0.5 is inside the swing phase, where the force is pinned to zero
    let model = CentroidalModel::monoped();
    let weight = model.mass() * model.gravity();
    let constraint = DynamicConstraint::new(Box::new(model), 0.0).time_discretized(
        vars.clone(),
        params.total_duration,
        Sampling::Fixed(vec![0.1, 0.5]),
        false,
    )?;

    let values = constraint.values()?;
    assert_eq!(values.len(), 12);
    // stance: the initial guess carries the full weight under the base
    for row in 0..6 {
        assert_relative_eq!(values[row], 0.0, epsilon = 1e-9);
    }
    assert_relative_eq!(values[6], 0.0, epsilon = 1e-12);
    assert_relative_eq!(values[7], 0.0, epsilon = 1e-12);
    assert_relative_eq!(values[8], weight, epsilon = 1e-9);
    for row in 9..12 {
        assert_relative_eq!(values[row], 0.0, epsilon = 1e-12);
    }
    Ok(())
}

#[test]
fn test_model_state_is_cached_per_instant() -> TestResult {
    let params = MotionParameters::default();
    let vars = monoped_variables(&params);
    let updates = Arc::new(AtomicUsize::new(0));
    let model = CountingModel {
        inner: CentroidalModel::monoped(),
        updates: updates.clone(),
    };

    let constraint = DynamicConstraint::new(Box::new(model), 0.0).time_discretized(
        vars.clone(),
        params.total_duration,
        Sampling::Fixed(vec![0.3]),
        false,
    )?;

    constraint.values()?;
    assert_eq!(updates.load(Ordering::SeqCst), 1);
    constraint.values()?;
    constraint.jacobian_block(BASE_LIN)?;
    constraint.jacobian()?;
    assert_eq!(updates.load(Ordering::SeqCst), 1);

    // a write bumps the container revision and invalidates the cache
    {
        let mut guard = write_variables(&vars)?;
        let x = guard.values_of(BASE_LIN)?;
        guard.set_values_of(BASE_LIN, x.as_slice())?;
    }
    constraint.values()?;
    assert_eq!(updates.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn test_schedule_change_moves_evaluation_times() -> TestResult {
    let params = MotionParameters::default().with_optimize_timings(true);
    let vars = monoped_variables(&params);

    let mut constraint = DynamicConstraint::new(Box::new(CentroidalModel::monoped()), 0.0)
        .time_discretized(
            vars.clone(),
            params.total_duration,
            Sampling::FromSchedule {
                dt: params.dt_dynamic_constraint,
            },
            false,
        )?;
    // switches at 0.4 and 0.6 fall on the grid
    assert_eq!(constraint.evaluation_times().len(), 11);
    assert_eq!(constraint.rows(), 66);

    shift_schedule(&vars, &[0.45, 0.2, 0.35]);
    assert_eq!(constraint.rows(), 66);
    constraint.update_variable_dependent_quantities()?;

    assert_eq!(constraint.evaluation_times().len(), 13);
    assert_eq!(constraint.rows(), 78);
    assert_eq!(constraint.values()?.len(), 78);
    assert_eq!(constraint.bounds()?.len(), 78);
    assert!(constraint
        .evaluation_times()
        .iter()
        .any(|t| (t - 0.45).abs() < 1e-12));
    Ok(())
}
