//! Optimization variables shared by every cost and constraint
//!
//! # Module Structure
//!
//! - `node_values`: spline-backed node sets (base motion, endeffector motion and force)
//! - `contact_schedule`: per-endeffector phase durations
//! - `angular_state_converter`: Euler-angle spline to angular velocity/acceleration
//!
//! All sets live in one [`VariableContainer`]. Its insertion order defines
//! the column layout of every Jacobian, and it is shared by reference
//! through [`SharedVariables`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use legged_splines::{CurveState, Node};
use nalgebra::{DVector, Vector3};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{NlpError, NlpResult};
use crate::parameters::MotionParameters;

pub mod angular_state_converter;
pub mod contact_schedule;
pub mod node_values;

pub use angular_state_converter::AngularStateConverter;
pub use contact_schedule::ContactSchedule;
pub use node_values::NodeValues;

pub const BASE_LIN: &str = "base-lin";
pub const BASE_ANG: &str = "base-ang";

pub fn ee_motion(ee: usize) -> String {
    format!("ee-motion_{ee}")
}

pub fn ee_force(ee: usize) -> String {
    format!("ee-force_{ee}")
}

pub fn ee_schedule(ee: usize) -> String {
    format!("ee-schedule_{ee}")
}

/// Role of a variable set, recovered from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetId {
    BaseLinear,
    BaseAngular,
    EeMotion(usize),
    EeForce(usize),
    EeSchedule(usize),
}

impl SetId {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            BASE_LIN => return Some(SetId::BaseLinear),
            BASE_ANG => return Some(SetId::BaseAngular),
            _ => {}
        }
        let (prefix, ee) = name.rsplit_once('_')?;
        let ee = ee.parse().ok()?;
        match prefix {
            "ee-motion" => Some(SetId::EeMotion(ee)),
            "ee-force" => Some(SetId::EeForce(ee)),
            "ee-schedule" => Some(SetId::EeSchedule(ee)),
            _ => None,
        }
    }
}

/// Lower and upper bound of one scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: f64,
    pub upper: f64,
}

impl Bounds {
    pub const UNBOUNDED: Bounds = Bounds {
        lower: f64::NEG_INFINITY,
        upper: f64::INFINITY,
    };

    pub const fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub const fn equality(value: f64) -> Self {
        Self::new(value, value)
    }

    pub const fn lower_only(lower: f64) -> Self {
        Self::new(lower, f64::INFINITY)
    }

    /// `[-tolerance, tolerance]`
    pub fn symmetric(tolerance: f64) -> Self {
        Self::new(-tolerance, tolerance)
    }

    /// Signed distance of `value` outside the bounds, zero inside.
    pub fn violation(&self, value: f64) -> f64 {
        if value > self.upper {
            value - self.upper
        } else if value < self.lower {
            value - self.lower
        } else {
            0.0
        }
    }
}

/// Boundary state of the floating base.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BaseState {
    pub lin: CurveState,
    /// Euler angles (roll, pitch, yaw) and their rates
    pub ang: CurveState,
}

impl BaseState {
    pub fn at_rest(position: Vector3<f64>, euler: Vector3<f64>) -> Self {
        Self {
            lin: CurveState::at_rest(position),
            ang: CurveState::at_rest(euler),
        }
    }
}

/// One named variable set.
#[derive(Debug, Clone, PartialEq)]
pub enum VariableSet {
    Nodes(NodeValues),
    Schedule(ContactSchedule),
}

impl VariableSet {
    pub fn len(&self) -> usize {
        match self {
            VariableSet::Nodes(values) => values.len(),
            VariableSet::Schedule(schedule) => schedule.phase_count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> DVector<f64> {
        match self {
            VariableSet::Nodes(values) => values.values(),
            VariableSet::Schedule(schedule) => schedule.values(),
        }
    }

    pub fn set_values(&mut self, values: &[f64]) -> NlpResult<()> {
        match self {
            VariableSet::Nodes(nodes) => nodes.set_values(values),
            VariableSet::Schedule(schedule) => schedule.set_values(values),
        }
    }

    pub fn bounds(&self) -> Vec<Bounds> {
        match self {
            VariableSet::Nodes(values) => values.bounds().to_vec(),
            VariableSet::Schedule(schedule) => schedule.bounds(),
        }
    }
}

/// Ordered, name-keyed collection of variable sets.
#[derive(Debug, Clone, Default)]
pub struct VariableContainer {
    names: Vec<String>,
    sets: Vec<VariableSet>,
    index: HashMap<String, usize>,
    revision: u64,
}

/// Variable container shared by every component of one problem.
pub type SharedVariables = Arc<RwLock<VariableContainer>>;

pub fn read_variables(
    variables: &SharedVariables,
) -> NlpResult<RwLockReadGuard<'_, VariableContainer>> {
    variables
        .read()
        .map_err(|e| NlpError::ThreadError(format!("Variable container poisoned: {e}")))
}

pub fn write_variables(
    variables: &SharedVariables,
) -> NlpResult<RwLockWriteGuard<'_, VariableContainer>> {
    variables
        .write()
        .map_err(|e| NlpError::ThreadError(format!("Variable container poisoned: {e}")))
}

impl VariableContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> SharedVariables {
        Arc::new(RwLock::new(self))
    }

    pub fn add(&mut self, name: impl Into<String>, set: VariableSet) -> NlpResult<()> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(NlpError::DuplicateVariableSet(name));
        }
        self.index.insert(name.clone(), self.sets.len());
        self.names.push(name);
        self.sets.push(set);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> NlpResult<&VariableSet> {
        self.index
            .get(name)
            .map(|&id| &self.sets[id])
            .ok_or_else(|| NlpError::UnknownVariableSet(name.to_string()))
    }

    pub fn nodes(&self, name: &str) -> NlpResult<&NodeValues> {
        match self.get(name)? {
            VariableSet::Nodes(values) => Ok(values),
            VariableSet::Schedule(_) => Err(NlpError::InvalidInput(format!(
                "variable set {name} is not a node-value set"
            ))),
        }
    }

    pub fn schedule(&self, name: &str) -> NlpResult<&ContactSchedule> {
        match self.get(name)? {
            VariableSet::Schedule(schedule) => Ok(schedule),
            VariableSet::Nodes(_) => Err(NlpError::InvalidInput(format!(
                "variable set {name} is not a contact schedule"
            ))),
        }
    }

    pub fn set_len(&self, name: &str) -> NlpResult<usize> {
        Ok(self.get(name)?.len())
    }

    /// Set names in column order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// `(name, column offset, size)` of every set in column order.
    pub fn layout(&self) -> Vec<(String, usize, usize)> {
        let mut offset = 0;
        self.names
            .iter()
            .zip(&self.sets)
            .map(|(name, set)| {
                let entry = (name.clone(), offset, set.len());
                offset += set.len();
                entry
            })
            .collect()
    }

    pub fn column_offset(&self, name: &str) -> NlpResult<usize> {
        let id = *self
            .index
            .get(name)
            .ok_or_else(|| NlpError::UnknownVariableSet(name.to_string()))?;
        Ok(self.sets[..id].iter().map(VariableSet::len).sum())
    }

    pub fn total_len(&self) -> usize {
        self.sets.iter().map(VariableSet::len).sum()
    }

    /// Number of endeffectors with a motion set.
    pub fn ee_count(&self) -> usize {
        (0..).take_while(|&ee| self.contains(&ee_motion(ee))).count()
    }

    /// Incremented on every value change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn values(&self) -> DVector<f64> {
        let mut values = DVector::zeros(self.total_len());
        let mut offset = 0;
        for set in &self.sets {
            let n = set.len();
            values.rows_mut(offset, n).copy_from(&set.values());
            offset += n;
        }
        values
    }

    pub fn values_of(&self, name: &str) -> NlpResult<DVector<f64>> {
        Ok(self.get(name)?.values())
    }

    pub fn bounds(&self) -> Vec<Bounds> {
        self.sets.iter().flat_map(VariableSet::bounds).collect()
    }

    /// Overwrite every set from one concatenated vector.
    ///
    /// All or nothing: on error the container keeps its previous values
    /// and revision.
    pub fn set_values(&mut self, values: &DVector<f64>) -> NlpResult<()> {
        let total = self.total_len();
        if values.len() != total {
            return Err(NlpError::DimensionMismatch {
                expected: total,
                actual: values.len(),
                context: "variable container values".to_string(),
            });
        }
        let mut sets = self.sets.clone();
        let mut offset = 0;
        for set in &mut sets {
            let n = set.len();
            set.set_values(&values.as_slice()[offset..offset + n])?;
            offset += n;
        }
        self.commit(sets)
    }

    /// Overwrite a single set, all or nothing.
    pub fn set_values_of(&mut self, name: &str, values: &[f64]) -> NlpResult<()> {
        let id = *self
            .index
            .get(name)
            .ok_or_else(|| NlpError::UnknownVariableSet(name.to_string()))?;
        let mut sets = self.sets.clone();
        sets[id].set_values(values)?;
        self.commit(sets)
    }

    /// Adopt staged sets once their schedules reached the endeffector splines.
    fn commit(&mut self, mut sets: Vec<VariableSet>) -> NlpResult<()> {
        self.sync_schedules(&mut sets)?;
        self.sets = sets;
        self.revision += 1;
        Ok(())
    }

    /// Push schedule durations into the endeffector splines of `sets`.
    fn sync_schedules(&self, sets: &mut [VariableSet]) -> NlpResult<()> {
        for ee in 0..self.ee_count() {
            let Some(&schedule_id) = self.index.get(&ee_schedule(ee)) else {
                continue;
            };
            let durations = match &sets[schedule_id] {
                VariableSet::Schedule(schedule) => schedule.durations().to_vec(),
                VariableSet::Nodes(_) => continue,
            };
            for name in [ee_motion(ee), ee_force(ee)] {
                if let Some(&id) = self.index.get(&name) {
                    if let VariableSet::Nodes(values) = &mut sets[id] {
                        values.update_phase_durations(&durations)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Build every variable set of a formulation with a straight-line initial guess.
pub fn build_variables(
    params: &MotionParameters,
    initial_base: &BaseState,
    final_base: &BaseState,
    initial_ee_positions: &[Vector3<f64>],
) -> NlpResult<VariableContainer> {
    params.validate()?;
    let ee_count = params.ee_count();
    if initial_ee_positions.len() != ee_count {
        return Err(NlpError::DimensionMismatch {
            expected: ee_count,
            actual: initial_ee_positions.len(),
            context: "initial endeffector positions".to_string(),
        });
    }

    let mut container = VariableContainer::new();
    let horizon = params.total_duration;
    let nodes = params.base_segment_count + 1;

    container.add(
        BASE_LIN,
        VariableSet::Nodes(NodeValues::uniform(
            interpolated_nodes(&initial_base.lin, &final_base.lin, nodes),
            horizon,
        )?),
    )?;
    container.add(
        BASE_ANG,
        VariableSet::Nodes(NodeValues::uniform(
            interpolated_nodes(&initial_base.ang, &final_base.ang, nodes),
            horizon,
        )?),
    )?;

    let stance_force = Vector3::new(0.0, 0.0, params.robot_mass * params.gravity / ee_count as f64);
    for (ee, position) in initial_ee_positions.iter().enumerate() {
        let schedule = ContactSchedule::new(
            params.ee_phase_durations[ee].clone(),
            params.ee_in_contact_at_start[ee],
            params.min_phase_duration,
            params.max_phase_duration,
        )?;
        container.add(
            ee_motion(ee),
            VariableSet::Nodes(NodeValues::phased_motion(
                *position,
                &schedule,
                params.polys_per_swing,
            )?),
        )?;
        container.add(
            ee_force(ee),
            VariableSet::Nodes(NodeValues::phased_force(
                stance_force,
                &schedule,
                params.polys_per_stance_force,
                params.max_normal_force,
            )?),
        )?;
        if params.optimize_timings {
            container.add(ee_schedule(ee), VariableSet::Schedule(schedule))?;
        }
    }

    info!(
        "Built {} variable sets with {} variables for {} endeffector(s)",
        container.names().len(),
        container.total_len(),
        ee_count
    );
    Ok(container)
}

fn interpolated_nodes(start: &CurveState, end: &CurveState, count: usize) -> Vec<Node> {
    let last = count.saturating_sub(1).max(1) as f64;
    (0..count)
        .map(|k| {
            let s = k as f64 / last;
            Node::new(start.p.lerp(&end.p, s), start.v.lerp(&end.v, s))
        })
        .collect()
}
