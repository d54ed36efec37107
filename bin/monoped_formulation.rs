//! Assemble a monoped hopping formulation and report its size.
//!
//! Builds the variables, initializes the factory on flat ground with the
//! centroidal model, stacks every configured constraint and cost, and
//! optionally writes the initial-guess trajectory as a JSON snapshot.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use nalgebra::Vector3;
use tracing::{error, info};

use legged_nlp::models::CentroidalModel;
use legged_nlp::snapshot::TrajectorySnapshot;
use legged_nlp::terrain::{FlatGround, HeightMap, Slope};
use legged_nlp::variables::{build_variables, read_variables};
use legged_nlp::{
    init_logger, BaseState, CostConstraintFactory, CostName, MotionParameters, NlpResult,
};

#[derive(Parser)]
#[command(name = "monoped_formulation")]
#[command(about = "Assemble the NLP of a hopping monoped")]
struct Args {
    /// Motion parameters as JSON; defaults are used when omitted
    #[arg(short, long)]
    params: Option<PathBuf>,

    /// Forward distance of the goal base position in meters
    #[arg(long, default_value = "0.5")]
    distance: f64,

    /// Standing height of the base above the ground
    #[arg(long, default_value = "0.58")]
    height: f64,

    /// Treat phase durations as decision variables
    #[arg(long)]
    optimize_timings: bool,

    /// Evaluate time-discretized constraints on the rayon pool
    #[arg(long)]
    parallel: bool,

    /// Ground slope starting at x = 0.25 (flat when omitted)
    #[arg(long)]
    slope: Option<f64>,

    /// Write the initial-guess trajectory here
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Sampling step of the snapshot
    #[arg(long, default_value = "0.02")]
    snapshot_dt: f64,
}

fn load_params(args: &Args) -> NlpResult<MotionParameters> {
    let params = match &args.params {
        Some(path) => MotionParameters::load_json(path)?,
        None => MotionParameters::default().with_costs(vec![
            (CostName::Motion, 1.0),
            (CostName::Forces, 1e-4),
        ]),
    };
    let params = if args.optimize_timings {
        params.with_optimize_timings(true)
    } else {
        params
    };
    Ok(if args.parallel {
        params.with_parallel_instants(true)
    } else {
        params
    })
}

fn run(args: &Args) -> NlpResult<()> {
    let params = load_params(args)?;
    params.validate()?;
    let ee_count = params.ee_count();

    let initial_base = BaseState::at_rest(Vector3::new(0.0, 0.0, args.height), Vector3::zeros());
    let final_base = BaseState::at_rest(
        Vector3::new(args.distance, 0.0, args.height),
        Vector3::zeros(),
    );
    let initial_ee: Vec<Vector3<f64>> = params
        .nominal_stance
        .iter()
        .map(|p| Vector3::new(p[0], p[1], 0.0))
        .collect();

    let terrain: Arc<dyn HeightMap> = match args.slope {
        Some(slope) => Arc::new(Slope::new(0.25, slope)),
        None => Arc::new(FlatGround::default()),
    };
    let reference = CentroidalModel::monoped();
    let model = CentroidalModel::new(params.robot_mass, *reference.inertia(), ee_count)?
        .with_gravity(params.gravity);

    let start = Instant::now();
    let variables = build_variables(&params, &initial_base, &final_base, &initial_ee)?.into_shared();
    let mut factory = CostConstraintFactory::new();
    factory.init(
        variables.clone(),
        params,
        terrain,
        Box::new(model),
        initial_ee,
        initial_base,
        final_base,
    )?;
    let problem = factory.problem()?;

    let values = problem.constraint_values()?;
    let bounds = problem.constraint_bounds()?;
    let violation = values
        .iter()
        .zip(&bounds)
        .map(|(g, b)| b.violation(*g).abs())
        .fold(0.0, f64::max);
    let jacobian = problem.jacobian()?;
    let nnz: usize = (0..jacobian.ncols())
        .map(|col| jacobian.val_of_col(col).len())
        .sum();

    info!(
        "Assembled in {:.2} ms: {} variables, {} constraints, {} Jacobian non-zeros",
        start.elapsed().as_secs_f64() * 1000.0,
        problem.variable_count()?,
        problem.constraint_count(),
        nnz
    );
    info!(
        "Initial guess: cost {:.6e}, max bound violation {:.6e}",
        problem.cost()?,
        violation
    );

    if let Some(path) = &args.snapshot {
        let snapshot = {
            let vars = read_variables(&variables)?;
            TrajectorySnapshot::from_variables(&vars, args.snapshot_dt)?
        };
        snapshot.save_json(path)?;
        info!(
            "Snapshot with {} samples written to {}",
            snapshot.samples.len(),
            path.display()
        );
    }
    Ok(())
}

fn main() {
    init_logger();
    let args = Args::parse();
    if let Err(e) = run(&args) {
        error!("{e}");
        std::process::exit(1);
    }
}
