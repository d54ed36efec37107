//! Named construction of costs and constraints.
//!
//! [`CostConstraintFactory::init`] stores the shared variables, parameters,
//! terrain, dynamic model and boundary states exactly once. Each `get_*`
//! call then builds a fresh component wired to those references. Dispatch
//! goes through a table from name to builder function, so the supported
//! names are enumerable and a missing entry is reported like an unknown name.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use legged_splines::Dx;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constraints::time_discretization::uniform_times;
use crate::constraints::{
    Constraint, DynamicConstraint, RangeOfMotionBox, Sampling, StateBoundaryConstraint,
    SwingConstraint, TerrainConstraint, TimeDiscretizationConstraint, TotalTimeConstraint,
};
use crate::costs::polynomial::check_weight;
use crate::costs::{CompositeCost, Cost, QuadraticForm, QuadraticPolynomialCost, SoftConstraint};
use crate::error::{NlpError, NlpResult};
use crate::models::DynamicModel;
use crate::parameters::MotionParameters;
use crate::problem::Problem;
use crate::terrain::HeightMap;
use crate::variables::{ee_force, read_variables, BaseState, SharedVariables, BASE_ANG, BASE_LIN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConstraintName {
    StateBoundary,
    Dynamic,
    RangeOfMotionBox,
    TotalTime,
    Terrain,
    Swing,
}

impl ConstraintName {
    pub const ALL: [ConstraintName; 6] = [
        ConstraintName::StateBoundary,
        ConstraintName::Dynamic,
        ConstraintName::RangeOfMotionBox,
        ConstraintName::TotalTime,
        ConstraintName::Terrain,
        ConstraintName::Swing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintName::StateBoundary => "state-boundary",
            ConstraintName::Dynamic => "dynamic",
            ConstraintName::RangeOfMotionBox => "range-of-motion-box",
            ConstraintName::TotalTime => "total-time",
            ConstraintName::Terrain => "terrain",
            ConstraintName::Swing => "swing",
        }
    }
}

impl fmt::Display for ConstraintName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConstraintName {
    type Err = NlpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConstraintName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| NlpError::UnknownConstraintName(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CostName {
    Forces,
    Motion,
    Polynomial,
}

impl CostName {
    pub const ALL: [CostName; 3] = [CostName::Forces, CostName::Motion, CostName::Polynomial];

    pub fn as_str(&self) -> &'static str {
        match self {
            CostName::Forces => "forces",
            CostName::Motion => "motion",
            CostName::Polynomial => "polynomial",
        }
    }
}

impl fmt::Display for CostName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CostName {
    type Err = NlpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CostName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| NlpError::UnknownCostName(s.to_string()))
    }
}

/// Everything stored by `init`.
pub struct FactoryContext {
    pub variables: SharedVariables,
    pub params: MotionParameters,
    pub terrain: Arc<dyn HeightMap>,
    pub model: Box<dyn DynamicModel>,
    pub initial_ee_positions: Vec<Vector3<f64>>,
    pub initial_base: BaseState,
    pub final_base: BaseState,
}

impl FactoryContext {
    /// Sampling of a time-discretized constraint with grid step `dt`.
    fn sampling(&self, dt: f64) -> NlpResult<Sampling> {
        if self.params.optimize_timings {
            Ok(Sampling::FromSchedule { dt })
        } else {
            Ok(Sampling::Fixed(uniform_times(self.params.total_duration, dt)?))
        }
    }
}

type ConstraintBuilder = fn(&FactoryContext) -> NlpResult<Box<dyn Constraint>>;
type CostBuilder = fn(&CostConstraintFactory, &FactoryContext, f64) -> NlpResult<Box<dyn Cost>>;

pub struct CostConstraintFactory {
    context: Option<FactoryContext>,
    constraint_builders: HashMap<ConstraintName, ConstraintBuilder>,
    cost_builders: HashMap<CostName, CostBuilder>,
}

impl Default for CostConstraintFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl CostConstraintFactory {
    pub fn new() -> Self {
        let mut constraint_builders: HashMap<ConstraintName, ConstraintBuilder> = HashMap::new();
        constraint_builders.insert(ConstraintName::StateBoundary, make_state_boundary_constraint);
        constraint_builders.insert(ConstraintName::Dynamic, make_dynamic_constraint);
        constraint_builders.insert(ConstraintName::RangeOfMotionBox, make_range_of_motion_constraint);
        constraint_builders.insert(ConstraintName::TotalTime, make_total_time_constraint);
        constraint_builders.insert(ConstraintName::Terrain, make_terrain_constraint);
        constraint_builders.insert(ConstraintName::Swing, make_swing_constraint);

        let mut cost_builders: HashMap<CostName, CostBuilder> = HashMap::new();
        cost_builders.insert(CostName::Forces, make_forces_cost);
        cost_builders.insert(CostName::Motion, make_motion_cost);
        cost_builders.insert(CostName::Polynomial, make_configured_polynomial_cost);

        Self {
            context: None,
            constraint_builders,
            cost_builders,
        }
    }

    /// Store the shared configuration. Fails on a second call.
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        &mut self,
        variables: SharedVariables,
        params: MotionParameters,
        terrain: Arc<dyn HeightMap>,
        model: Box<dyn DynamicModel>,
        initial_ee_positions: Vec<Vector3<f64>>,
        initial_base: BaseState,
        final_base: BaseState,
    ) -> NlpResult<()> {
        if self.context.is_some() {
            return Err(NlpError::AlreadyInitialized);
        }
        params.validate()?;

        let ee_count = params.ee_count();
        let checks = [
            (initial_ee_positions.len(), "initial endeffector positions"),
            (model.ee_count(), "dynamic model endeffectors"),
            (read_variables(&variables)?.ee_count(), "variable container endeffectors"),
        ];
        for (actual, context) in checks {
            if actual != ee_count {
                return Err(NlpError::DimensionMismatch {
                    expected: ee_count,
                    actual,
                    context: context.to_string(),
                });
            }
        }

        info!(
            "Factory initialized: {} endeffector(s), horizon {}s, optimize timings {}",
            ee_count, params.total_duration, params.optimize_timings
        );
        self.context = Some(FactoryContext {
            variables,
            params,
            terrain,
            model,
            initial_ee_positions,
            initial_base,
            final_base,
        });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.context.is_some()
    }

    fn context(&self) -> NlpResult<&FactoryContext> {
        self.context.as_ref().ok_or(NlpError::NotInitialized)
    }

    pub fn get_constraint(&self, name: ConstraintName) -> NlpResult<Box<dyn Constraint>> {
        let ctx = self.context()?;
        let builder = self
            .constraint_builders
            .get(&name)
            .ok_or_else(|| NlpError::UnknownConstraintName(name.to_string()))?;
        let constraint = builder(ctx)?;
        debug!("Built constraint {} with {} rows", name, constraint.rows());
        Ok(constraint)
    }

    pub fn get_constraint_by_name(&self, name: &str) -> NlpResult<Box<dyn Constraint>> {
        self.get_constraint(name.parse()?)
    }

    /// `weight` must be finite and non-negative.
    pub fn get_cost(&self, name: CostName, weight: f64) -> NlpResult<Box<dyn Cost>> {
        let ctx = self.context()?;
        check_weight(weight)?;
        let builder = self
            .cost_builders
            .get(&name)
            .ok_or_else(|| NlpError::UnknownCostName(name.to_string()))?;
        let cost = builder(self, ctx, weight)?;
        debug!("Built cost {} with weight {}", name, weight);
        Ok(cost)
    }

    pub fn get_cost_by_name(&self, name: &str, weight: f64) -> NlpResult<Box<dyn Cost>> {
        self.get_cost(name.parse()?, weight)
    }

    /// Relax a constraint into a quadratic penalty on its bound violation.
    pub fn to_cost(&self, constraint: Box<dyn Constraint>, weight: f64) -> NlpResult<Box<dyn Cost>> {
        Ok(Box::new(SoftConstraint::new(constraint, weight)?))
    }

    /// Integrated squared derivative `dx` of the node-value set `set`.
    ///
    /// The quadratic form is frozen at the current segment durations, so a
    /// phase-based set is rejected while phase durations are optimized.
    pub fn make_polynomial_cost(
        &self,
        set: &str,
        dx: Dx,
        weight_dims: [f64; 3],
        weight: f64,
    ) -> NlpResult<Box<dyn Cost>> {
        let ctx = self.context()?;
        let form = {
            let vars = read_variables(&ctx.variables)?;
            let values = vars.nodes(set)?;
            if ctx.params.optimize_timings && values.phase_durations().is_some() {
                return Err(NlpError::InvalidInput(format!(
                    "polynomial cost on {set} would not follow optimized phase durations"
                )));
            }
            QuadraticForm::integrated_derivative(
                values,
                dx,
                weight_dims,
                ctx.params.dt_dynamic_constraint,
            )?
        };
        Ok(Box::new(QuadraticPolynomialCost::new(
            ctx.variables.clone(),
            set,
            form,
            weight,
        )?))
    }

    /// Remove a builder; later requests for `name` fail as unknown.
    pub fn deregister_constraint(&mut self, name: ConstraintName) {
        self.constraint_builders.remove(&name);
    }

    /// Registered constraint names in declaration order.
    pub fn constraint_names(&self) -> Vec<ConstraintName> {
        ConstraintName::ALL
            .into_iter()
            .filter(|name| self.constraint_builders.contains_key(name))
            .collect()
    }

    /// Problem with every constraint and cost listed in the parameters.
    pub fn problem(&self) -> NlpResult<Problem> {
        let ctx = self.context()?;
        let mut problem = Problem::new(ctx.variables.clone());
        for &name in &ctx.params.constraints {
            problem.add_constraint(self.get_constraint(name)?)?;
        }
        for &(name, weight) in &ctx.params.costs {
            problem.add_cost(self.get_cost(name, weight)?)?;
        }
        problem.log_summary()?;
        Ok(problem)
    }
}

fn time_discretized<H>(
    hook: H,
    ctx: &FactoryContext,
    dt: f64,
) -> NlpResult<Box<dyn Constraint>>
where
    H: crate::constraints::InstantConstraint + 'static,
{
    let constraint = TimeDiscretizationConstraint::new(
        hook,
        ctx.variables.clone(),
        ctx.params.total_duration,
        ctx.sampling(dt)?,
    )?
    .with_parallel(ctx.params.parallel_instants);
    Ok(Box::new(constraint))
}

fn make_state_boundary_constraint(ctx: &FactoryContext) -> NlpResult<Box<dyn Constraint>> {
    Ok(Box::new(StateBoundaryConstraint::new(
        ctx.variables.clone(),
        ctx.params.total_duration,
        &ctx.initial_base,
        &ctx.final_base,
        &ctx.initial_ee_positions,
    )))
}

fn make_dynamic_constraint(ctx: &FactoryContext) -> NlpResult<Box<dyn Constraint>> {
    let hook = DynamicConstraint::new(
        ctx.model.boxed_clone(),
        ctx.params.dynamic_constraint_tolerance,
    );
    time_discretized(hook, ctx, ctx.params.dt_dynamic_constraint)
}

fn make_range_of_motion_constraint(ctx: &FactoryContext) -> NlpResult<Box<dyn Constraint>> {
    let hook = RangeOfMotionBox::new(
        ctx.params
            .nominal_stance
            .iter()
            .map(|p| Vector3::from(*p))
            .collect(),
        Vector3::from(ctx.params.max_deviation),
    );
    time_discretized(hook, ctx, ctx.params.dt_range_of_motion)
}

fn make_total_time_constraint(ctx: &FactoryContext) -> NlpResult<Box<dyn Constraint>> {
    Ok(Box::new(TotalTimeConstraint::new(
        ctx.variables.clone(),
        ctx.params.total_duration,
    )?))
}

fn make_terrain_constraint(ctx: &FactoryContext) -> NlpResult<Box<dyn Constraint>> {
    Ok(Box::new(TerrainConstraint::new(
        ctx.variables.clone(),
        ctx.terrain.clone(),
    )?))
}

fn make_swing_constraint(ctx: &FactoryContext) -> NlpResult<Box<dyn Constraint>> {
    Ok(Box::new(SwingConstraint::new(ctx.variables.clone())?))
}

/// Squared contact-force values of every endeffector.
fn make_forces_cost(
    _factory: &CostConstraintFactory,
    ctx: &FactoryContext,
    weight: f64,
) -> NlpResult<Box<dyn Cost>> {
    let mut composite = CompositeCost::new("forces", ctx.variables.clone());
    for ee in 0..ctx.params.ee_count() {
        let set = ee_force(ee);
        let form = {
            let vars = read_variables(&ctx.variables)?;
            let values = vars.nodes(&set)?;
            QuadraticForm::diagonal_on_values(values, [1.0; 3])?
        };
        composite.add(Box::new(QuadraticPolynomialCost::new(
            ctx.variables.clone(),
            set,
            form,
            weight,
        )?));
    }
    Ok(Box::new(composite))
}

/// Integrated squared base linear and angular acceleration.
fn make_motion_cost(
    factory: &CostConstraintFactory,
    ctx: &FactoryContext,
    weight: f64,
) -> NlpResult<Box<dyn Cost>> {
    let weights = ctx.params.motion_cost_weights;
    Ok(Box::new(
        CompositeCost::new("motion", ctx.variables.clone())
            .with_term(factory.make_polynomial_cost(BASE_LIN, Dx::Acc, weights.linear, weight)?)
            .with_term(factory.make_polynomial_cost(BASE_ANG, Dx::Acc, weights.angular, weight)?),
    ))
}

fn make_configured_polynomial_cost(
    factory: &CostConstraintFactory,
    ctx: &FactoryContext,
    weight: f64,
) -> NlpResult<Box<dyn Cost>> {
    let config = &ctx.params.polynomial_cost;
    factory.make_polynomial_cost(&config.set, config.dx, config.weight_dims, weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CentroidalModel;
    use crate::terrain::FlatGround;
    use crate::variables::build_variables;

    fn initialized(params: MotionParameters) -> CostConstraintFactory {
        let start = BaseState::at_rest(Vector3::new(0.0, 0.0, 0.58), Vector3::zeros());
        let goal = BaseState::at_rest(Vector3::new(0.2, 0.0, 0.58), Vector3::zeros());
        let feet = vec![Vector3::zeros()];
        let vars = build_variables(&params, &start, &goal, &feet)
            .unwrap()
            .into_shared();
        let mut factory = CostConstraintFactory::new();
        factory
            .init(
                vars,
                params,
                Arc::new(FlatGround::default()),
                Box::new(CentroidalModel::monoped()),
                feet,
                start,
                goal,
            )
            .unwrap();
        factory
    }

    #[test]
    fn test_names_round_trip_through_strings() {
        for name in ConstraintName::ALL {
            assert_eq!(name.as_str().parse::<ConstraintName>().unwrap(), name);
        }
        for name in CostName::ALL {
            assert_eq!(name.to_string().parse::<CostName>().unwrap(), name);
        }
        assert!(matches!(
            "foo".parse::<ConstraintName>(),
            Err(NlpError::UnknownConstraintName(s)) if s == "foo"
        ));
        assert!(matches!(
            "bar".parse::<CostName>(),
            Err(NlpError::UnknownCostName(_))
        ));
        let json = serde_json::to_string(&ConstraintName::RangeOfMotionBox).unwrap();
        assert_eq!(json, "\"range-of-motion-box\"");
    }

    #[test]
    fn test_get_before_init_fails() {
        let factory = CostConstraintFactory::new();
        assert!(!factory.is_initialized());
        assert!(matches!(
            factory.get_constraint(ConstraintName::Dynamic),
            Err(NlpError::NotInitialized)
        ));
        assert!(matches!(
            factory.get_cost(CostName::Motion, 1.0),
            Err(NlpError::NotInitialized)
        ));
    }

    #[test]
    fn test_second_init_fails() {
        let mut factory = initialized(MotionParameters::default());
        let vars = factory.context().unwrap().variables.clone();
        let result = factory.init(
            vars,
            MotionParameters::default(),
            Arc::new(FlatGround::default()),
            Box::new(CentroidalModel::monoped()),
            vec![Vector3::zeros()],
            BaseState::default(),
            BaseState::default(),
        );
        assert!(matches!(result, Err(NlpError::AlreadyInitialized)));
    }

    #[test]
    fn test_every_constraint_builds() {
        let factory = initialized(MotionParameters::default().with_optimize_timings(true));
        assert_eq!(factory.constraint_names(), ConstraintName::ALL.to_vec());
        for name in ConstraintName::ALL {
            let constraint = factory.get_constraint(name).unwrap();
            assert_eq!(constraint.bounds().unwrap().len(), constraint.rows());
        }
        let dynamic = factory.get_constraint_by_name("dynamic").unwrap();
        assert_eq!(dynamic.rows() % 6, 0);
    }

    #[test]
    fn test_deregistered_constraint_is_unknown() {
        let mut factory = initialized(MotionParameters::default());
        factory.deregister_constraint(ConstraintName::Swing);
        assert!(matches!(
            factory.get_constraint(ConstraintName::Swing),
            Err(NlpError::UnknownConstraintName(s)) if s == "swing"
        ));
        assert_eq!(factory.constraint_names().len(), 5);
    }

    #[test]
    fn test_cost_weights_are_validated() {
        let factory = initialized(MotionParameters::default());
        for weight in [-1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(
                factory.get_cost(CostName::Forces, weight),
                Err(NlpError::InvalidWeight(_))
            ));
        }
        for name in CostName::ALL {
            let cost = factory.get_cost(name, 0.5).unwrap();
            assert!(cost.cost().unwrap().is_finite());
        }
        assert!(matches!(
            factory.get_cost_by_name("jerk", 1.0),
            Err(NlpError::UnknownCostName(_))
        ));
    }

    #[test]
    fn test_init_checks_endeffector_counts() {
        let params = MotionParameters::default();
        let start = BaseState::at_rest(Vector3::new(0.0, 0.0, 0.58), Vector3::zeros());
        let vars = build_variables(&params, &start, &start, &[Vector3::zeros()])
            .unwrap()
            .into_shared();
        let mut factory = CostConstraintFactory::new();
        let result = factory.init(
            vars,
            params,
            Arc::new(FlatGround::default()),
            Box::new(CentroidalModel::monoped()),
            vec![Vector3::zeros(), Vector3::zeros()],
            start,
            start,
        );
        assert!(matches!(result, Err(NlpError::DimensionMismatch { .. })));
        assert!(!factory.is_initialized());
    }

    #[test]
    fn test_polynomial_cost_on_phased_set_needs_fixed_timings() {
        let motion = crate::variables::ee_motion(0);
        let fixed = initialized(MotionParameters::default());
        let cost = fixed
            .make_polynomial_cost(&motion, Dx::Vel, [1.0, 1.0, 1.0], 1.0)
            .unwrap();
        assert!(cost.cost().unwrap().is_finite());

        let optimized = initialized(MotionParameters::default().with_optimize_timings(true));
        assert!(matches!(
            optimized.make_polynomial_cost(&motion, Dx::Vel, [1.0, 1.0, 1.0], 1.0),
            Err(NlpError::InvalidInput(_))
        ));
        // uniform sets keep their durations
        assert!(optimized
            .make_polynomial_cost(BASE_LIN, Dx::Acc, [1.0, 1.0, 1.0], 1.0)
            .is_ok());
    }
}
