//! Dynamic constraint evaluation, serial vs parallel over instants.
//!
//! A four-legged trot-like schedule with a fine sampling grid gives enough
//! instants for the rayon path to matter.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use nalgebra::{Matrix3, Vector3};

use legged_nlp::constraints::time_discretization::uniform_times;
use legged_nlp::constraints::{Constraint, DynamicConstraint, Sampling};
use legged_nlp::models::CentroidalModel;
use legged_nlp::variables::{build_variables, SharedVariables};
use legged_nlp::{init_logger, BaseState, MotionParameters};

const HORIZON: f64 = 2.0;

fn quadruped_variables() -> (MotionParameters, SharedVariables) {
    let phases = vec![
        vec![0.4, 0.3, 0.6, 0.3, 0.4],
        vec![0.7, 0.3, 0.6, 0.4],
        vec![0.7, 0.3, 0.6, 0.4],
        vec![0.4, 0.3, 0.6, 0.3, 0.4],
    ];
    let nominal = vec![
        [0.3, 0.2, -0.5],
        [0.3, -0.2, -0.5],
        [-0.3, 0.2, -0.5],
        [-0.3, -0.2, -0.5],
    ];
    let feet: Vec<Vector3<f64>> = nominal
        .iter()
        .map(|p| Vector3::new(p[0], p[1], 0.0))
        .collect();
    let params = MotionParameters::default()
        .with_total_duration(HORIZON)
        .with_endeffectors(phases, vec![true; 4], nominal)
        .with_base_segment_count(20)
        .with_robot_mass(40.0);
    let start = BaseState::at_rest(Vector3::new(0.0, 0.0, 0.5), Vector3::zeros());
    let goal = BaseState::at_rest(Vector3::new(1.0, 0.0, 0.5), Vector3::new(0.0, 0.0, 0.3));
    let vars = build_variables(&params, &start, &goal, &feet)
        .unwrap()
        .into_shared();
    (params, vars)
}

fn bench_dynamic_constraint(c: &mut Criterion) {
    init_logger();
    let (params, vars) = quadruped_variables();
    let model = CentroidalModel::new(
        params.robot_mass,
        Matrix3::from_diagonal(&Vector3::new(0.9, 2.1, 2.4)),
        params.ee_count(),
    )
    .unwrap();

    let mut group = c.benchmark_group("dynamic_constraint");
    for dt in [0.05, 0.01] {
        let times = uniform_times(HORIZON, dt).unwrap();
        for parallel in [false, true] {
            let constraint = DynamicConstraint::new(Box::new(model.clone()), 0.0)
                .time_discretized(vars.clone(), HORIZON, Sampling::Fixed(times.clone()), parallel)
                .unwrap();
            let label = if parallel { "parallel" } else { "serial" };
            group.bench_with_input(BenchmarkId::new(label, times.len()), &constraint, |b, con| {
                b.iter(|| {
                    black_box(con.values().unwrap());
                    black_box(con.jacobian().unwrap());
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_dynamic_constraint);
criterion_main!(benches);
