//! Shared setup for formulation integration tests
//!
//! Builds a monoped formulation, moves every variable away from the
//! straight-line guess so that Jacobians are non-trivial, and estimates
//! Jacobians by central differences.

#![allow(dead_code)]

use legged_nlp::variables::{
    build_variables, ee_schedule, read_variables, write_variables, SetId, SharedVariables,
};
use legged_nlp::{BaseState, MotionParameters};
use nalgebra::{DMatrix, DVector, Vector3};

pub const FD_STEP: f64 = 1e-6;

/// Instants that avoid the phase switches of the default schedule.
pub const SMOOTH_TIMES: [f64; 6] = [0.05, 0.23, 0.47, 0.55, 0.71, 0.93];

pub fn start_state() -> BaseState {
    BaseState::at_rest(Vector3::new(0.0, 0.0, 0.58), Vector3::zeros())
}

pub fn goal_state() -> BaseState {
    BaseState::at_rest(Vector3::new(0.5, 0.1, 0.58), Vector3::new(0.0, 0.0, 0.25))
}

pub fn initial_feet() -> Vec<Vector3<f64>> {
    vec![Vector3::zeros()]
}

pub fn monoped_variables(params: &MotionParameters) -> SharedVariables {
    build_variables(params, &start_state(), &goal_state(), &initial_feet())
        .expect("default formulation builds")
        .into_shared()
}

/// Deterministic offsets on every node-value set; schedules stay untouched.
pub fn perturb_nodes(vars: &SharedVariables) {
    let mut guard = write_variables(vars).expect("container lock");
    let names: Vec<String> = guard.names().to_vec();
    for (s, name) in names.iter().enumerate() {
        let scale = match SetId::parse(name) {
            Some(SetId::EeSchedule(_)) | None => continue,
            Some(SetId::EeForce(_)) => 15.0,
            Some(SetId::BaseAngular) => 0.1,
            _ => 0.05,
        };
        let mut x = guard.values_of(name).expect("known set");
        for (i, value) in x.iter_mut().enumerate() {
            *value += scale * ((i as f64 + 1.0) * 0.731 + s as f64 * 1.37).sin();
        }
        guard.set_values_of(name, x.as_slice()).expect("same length");
    }
}

/// Shift the phase durations of endeffector 0, keeping their sum.
pub fn shift_schedule(vars: &SharedVariables, durations: &[f64]) {
    write_variables(vars)
        .expect("container lock")
        .set_values_of(&ee_schedule(0), durations)
        .expect("schedule length");
}

/// Central-difference Jacobian of `f` w.r.t. the variable set `set`.
///
/// The set is restored to its original values afterwards.
pub fn numeric_jacobian<F>(vars: &SharedVariables, set: &str, f: F) -> DMatrix<f64>
where
    F: Fn() -> DVector<f64>,
{
    let x = read_variables(vars)
        .expect("container lock")
        .values_of(set)
        .expect("known set");
    let write = |values: &DVector<f64>| {
        write_variables(vars)
            .expect("container lock")
            .set_values_of(set, values.as_slice())
            .expect("same length");
    };

    let rows = f().len();
    let mut jac = DMatrix::zeros(rows, x.len());
    for col in 0..x.len() {
        let mut plus = x.clone();
        plus[col] += FD_STEP;
        write(&plus);
        let f_plus = f();

        let mut minus = x.clone();
        minus[col] -= FD_STEP;
        write(&minus);
        let f_minus = f();

        jac.set_column(col, &((f_plus - f_minus) / (2.0 * FD_STEP)));
    }
    write(&x);
    jac
}

/// Largest entry-wise difference scaled by `max(1, |numeric|)`.
pub fn max_relative_error(analytic: &DMatrix<f64>, numeric: &DMatrix<f64>) -> f64 {
    assert_eq!(analytic.shape(), numeric.shape());
    analytic
        .iter()
        .zip(numeric.iter())
        .map(|(a, n)| (a - n).abs() / n.abs().max(1.0))
        .fold(0.0, f64::max)
}
