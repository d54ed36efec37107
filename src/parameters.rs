//! Motion parameters: horizon, discretization, which quantities are
//! optimized, and physical constants.
//!
//! Parameters are plain data. Build them with `Default` plus the `with_*`
//! methods or load them from JSON, then call [`MotionParameters::validate`]
//! before handing them to the factory.

use std::fs;
use std::path::Path;

use legged_splines::Dx;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{NlpError, NlpResult};
use crate::factory::{ConstraintName, CostName};
use crate::variables::BASE_LIN;

/// Tolerance on the sum of phase durations against the horizon.
const DURATION_SUM_TOLERANCE: f64 = 1e-6;

/// Target of the generic polynomial cost.
///
/// The integrated form is built once, so `set` must be a uniform set such
/// as `base-lin` or `base-ang` when phase durations are optimized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolynomialCostConfig {
    /// Name of the node-value set the cost reads
    pub set: String,
    /// Spline quantity that is squared and integrated
    pub dx: Dx,
    /// Per-dimension weights
    pub weight_dims: [f64; 3],
}

impl Default for PolynomialCostConfig {
    fn default() -> Self {
        Self {
            set: BASE_LIN.to_string(),
            dx: Dx::Acc,
            weight_dims: [1.0, 1.0, 1.0],
        }
    }
}

/// Per-dimension weights of the base acceleration cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionCostWeights {
    pub linear: [f64; 3],
    pub angular: [f64; 3],
}

impl Default for MotionCostWeights {
    fn default() -> Self {
        Self {
            linear: [1.0, 1.0, 1.0],
            angular: [1.0, 1.0, 1.0],
        }
    }
}

/// Configuration of one motion optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionParameters {
    /// Horizon length in seconds
    pub total_duration: f64,
    /// Phase durations per endeffector, alternating contact and swing
    pub ee_phase_durations: Vec<Vec<f64>>,
    /// Whether each endeffector starts in contact
    pub ee_in_contact_at_start: Vec<bool>,
    /// Sampling step of the dynamic constraint
    pub dt_dynamic_constraint: f64,
    /// Sampling step of the range-of-motion constraint
    pub dt_range_of_motion: f64,
    /// Number of equal-length segments of the base splines
    pub base_segment_count: usize,
    pub polys_per_swing: usize,
    pub polys_per_stance_force: usize,
    /// Treat phase durations as decision variables
    pub optimize_timings: bool,
    pub min_phase_duration: f64,
    pub max_phase_duration: f64,
    pub max_normal_force: f64,
    /// Gravity magnitude, acting along -z
    pub gravity: f64,
    /// Robot mass used for the initial force guess
    pub robot_mass: f64,
    /// Nominal endeffector position in the base frame, per endeffector
    pub nominal_stance: Vec<[f64; 3]>,
    /// Allowed deviation from the nominal stance per dimension
    pub max_deviation: [f64; 3],
    /// Half-width of the equality band of the dynamic constraint
    pub dynamic_constraint_tolerance: f64,
    /// Evaluate time-discretized constraints in parallel over instants
    pub parallel_instants: bool,
    pub polynomial_cost: PolynomialCostConfig,
    pub motion_cost_weights: MotionCostWeights,
    /// Constraints the formulation is assembled from
    pub constraints: Vec<ConstraintName>,
    /// Costs and their weights
    pub costs: Vec<(CostName, f64)>,
}

impl Default for MotionParameters {
    fn default() -> Self {
        Self {
            total_duration: 1.0,
            ee_phase_durations: vec![vec![0.4, 0.2, 0.4]],
            ee_in_contact_at_start: vec![true],
            dt_dynamic_constraint: 0.1,
            dt_range_of_motion: 0.1,
            base_segment_count: 10,
            polys_per_swing: 2,
            polys_per_stance_force: 3,
            optimize_timings: false,
            min_phase_duration: 0.1,
            max_phase_duration: 1.0,
            max_normal_force: 1000.0,
            gravity: 9.80665,
            robot_mass: 20.0,
            nominal_stance: vec![[0.0, 0.0, -0.58]],
            max_deviation: [0.25, 0.25, 0.15],
            dynamic_constraint_tolerance: 0.0,
            parallel_instants: false,
            polynomial_cost: PolynomialCostConfig::default(),
            motion_cost_weights: MotionCostWeights::default(),
            constraints: ConstraintName::ALL.to_vec(),
            costs: Vec::new(),
        }
    }
}

impl MotionParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ee_count(&self) -> usize {
        self.ee_phase_durations.len()
    }

    pub fn with_total_duration(mut self, total_duration: f64) -> Self {
        self.total_duration = total_duration;
        self
    }

    /// Replace every endeffector's phase sequence, its starting contact flag
    /// and nominal stance.
    pub fn with_endeffectors(
        mut self,
        phase_durations: Vec<Vec<f64>>,
        in_contact_at_start: Vec<bool>,
        nominal_stance: Vec<[f64; 3]>,
    ) -> Self {
        self.ee_phase_durations = phase_durations;
        self.ee_in_contact_at_start = in_contact_at_start;
        self.nominal_stance = nominal_stance;
        self
    }

    pub fn with_dt_dynamic_constraint(mut self, dt: f64) -> Self {
        self.dt_dynamic_constraint = dt;
        self
    }

    pub fn with_dt_range_of_motion(mut self, dt: f64) -> Self {
        self.dt_range_of_motion = dt;
        self
    }

    pub fn with_base_segment_count(mut self, count: usize) -> Self {
        self.base_segment_count = count;
        self
    }

    pub fn with_polys_per_phase(mut self, swing: usize, stance_force: usize) -> Self {
        self.polys_per_swing = swing;
        self.polys_per_stance_force = stance_force;
        self
    }

    pub fn with_optimize_timings(mut self, optimize: bool) -> Self {
        self.optimize_timings = optimize;
        self
    }

    pub fn with_phase_duration_limits(mut self, min: f64, max: f64) -> Self {
        self.min_phase_duration = min;
        self.max_phase_duration = max;
        self
    }

    pub fn with_gravity(mut self, gravity: f64) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_robot_mass(mut self, mass: f64) -> Self {
        self.robot_mass = mass;
        self
    }

    pub fn with_dynamic_constraint_tolerance(mut self, tolerance: f64) -> Self {
        self.dynamic_constraint_tolerance = tolerance;
        self
    }

    pub fn with_parallel_instants(mut self, parallel: bool) -> Self {
        self.parallel_instants = parallel;
        self
    }

    pub fn with_polynomial_cost(mut self, config: PolynomialCostConfig) -> Self {
        self.polynomial_cost = config;
        self
    }

    pub fn with_constraints(mut self, constraints: Vec<ConstraintName>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_costs(mut self, costs: Vec<(CostName, f64)>) -> Self {
        self.costs = costs;
        self
    }

    /// Check internal consistency.
    pub fn validate(&self) -> NlpResult<()> {
        let positive = |value: f64, what: &str| -> NlpResult<()> {
            if value.is_finite() && value > 0.0 {
                Ok(())
            } else {
                Err(NlpError::InvalidInput(format!(
                    "{what} must be positive and finite, got {value}"
                )))
            }
        };

        positive(self.total_duration, "total_duration")?;
        positive(self.dt_dynamic_constraint, "dt_dynamic_constraint")?;
        positive(self.dt_range_of_motion, "dt_range_of_motion")?;
        positive(self.max_normal_force, "max_normal_force")?;
        positive(self.robot_mass, "robot_mass")?;
        positive(self.max_phase_duration, "max_phase_duration")?;

        if !self.gravity.is_finite() {
            return Err(NlpError::InvalidInput(format!(
                "gravity must be finite, got {}",
                self.gravity
            )));
        }
        if !(self.dynamic_constraint_tolerance.is_finite()
            && self.dynamic_constraint_tolerance >= 0.0)
        {
            return Err(NlpError::InvalidInput(format!(
                "dynamic_constraint_tolerance must be non-negative, got {}",
                self.dynamic_constraint_tolerance
            )));
        }
        if self.min_phase_duration < 0.0 || self.min_phase_duration > self.max_phase_duration {
            return Err(NlpError::InvalidInput(format!(
                "phase duration limits [{}, {}] are inconsistent",
                self.min_phase_duration, self.max_phase_duration
            )));
        }
        if self.base_segment_count == 0
            || self.polys_per_swing == 0
            || self.polys_per_stance_force == 0
        {
            return Err(NlpError::InvalidInput(
                "polynomial counts must be at least one".to_string(),
            ));
        }

        let ee_count = self.ee_count();
        if ee_count == 0 {
            return Err(NlpError::InvalidInput(
                "at least one endeffector is required".to_string(),
            ));
        }
        if self.ee_in_contact_at_start.len() != ee_count {
            return Err(NlpError::DimensionMismatch {
                expected: ee_count,
                actual: self.ee_in_contact_at_start.len(),
                context: "ee_in_contact_at_start".to_string(),
            });
        }
        if self.nominal_stance.len() != ee_count {
            return Err(NlpError::DimensionMismatch {
                expected: ee_count,
                actual: self.nominal_stance.len(),
                context: "nominal_stance".to_string(),
            });
        }

        for (ee, phases) in self.ee_phase_durations.iter().enumerate() {
            if phases.is_empty() {
                return Err(NlpError::InvalidInput(format!(
                    "endeffector {ee} has no phases"
                )));
            }
            if let Some(bad) = phases.iter().find(|d| !(d.is_finite() && **d > 0.0)) {
                return Err(NlpError::InvalidInput(format!(
                    "endeffector {ee} has an invalid phase duration {bad}"
                )));
            }
            let sum: f64 = phases.iter().sum();
            if (sum - self.total_duration).abs() > DURATION_SUM_TOLERANCE {
                return Err(NlpError::InvalidInput(format!(
                    "phase durations of endeffector {ee} sum to {sum}, horizon is {}",
                    self.total_duration
                )));
            }
            if self.optimize_timings
                && phases
                    .iter()
                    .any(|d| *d < self.min_phase_duration || *d > self.max_phase_duration)
            {
                warn!(
                    "Initial phase durations of endeffector {} lie outside [{}, {}]",
                    ee, self.min_phase_duration, self.max_phase_duration
                );
            }
        }

        if self.dt_dynamic_constraint > self.total_duration {
            warn!(
                "dt_dynamic_constraint {} exceeds the horizon {}",
                self.dt_dynamic_constraint, self.total_duration
            );
        }

        Ok(())
    }

    pub fn from_json_str(json: &str) -> NlpResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string(&self) -> NlpResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load parameters from a JSON file. Missing fields take their defaults.
    pub fn load_json<P: AsRef<Path>>(path: P) -> NlpResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> NlpResult<()> {
        fs::write(path, self.to_json_string()?)?;
        Ok(())
    }
}
