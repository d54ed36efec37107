//! Evaluation scheme for constraints that hold at many instants.
//!
//! A [`TimeDiscretizationConstraint`] owns an ordered list of evaluation
//! times and asks an [`InstantConstraint`] for the rows, bounds and
//! Jacobian blocks of each instant. Instant `k` occupies rows
//! `[k·R, (k+1)·R)` where `R` is the hook's fixed row count.
//!
//! Times are either fixed at construction or derived from the contact
//! schedules: a uniform grid merged with every interior phase switch. The
//! derived list is rebuilt in `update_variable_dependent_quantities`, so
//! the row count follows the schedule when phase durations are optimized.
//!
//! Each hook gets a mutable evaluation context. Serial evaluation reuses
//! one long-lived context so per-instant caches survive between a value
//! query and the Jacobian queries that follow. Parallel evaluation over
//! instants gives every rayon worker its own context.

use std::sync::Mutex;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::debug;

use crate::constraints::{check_block_shape, Constraint};
use crate::error::{NlpError, NlpResult};
use crate::variables::{ee_motion, read_variables, Bounds, SharedVariables, VariableContainer};

/// Two evaluation times closer than this are the same instant.
pub const DUPLICATE_TOLERANCE: f64 = 1e-9;

/// How evaluation times are chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum Sampling {
    /// Explicit, strictly increasing times within `[0, horizon]`
    Fixed(Vec<f64>),
    /// Grid of step `dt` plus every phase switch, rebuilt on schedule changes
    FromSchedule { dt: f64 },
}

/// Per-instant part of a time-discretized constraint.
pub trait InstantConstraint: Send + Sync {
    /// Mutable evaluation state, e.g. a dynamic model and its cache key
    type Context: Send;

    fn name(&self) -> &str;

    fn rows_per_instant(&self) -> usize;

    /// Fresh evaluation context.
    fn context(&self) -> Self::Context;

    fn constraint_at_instant(
        &self,
        ctx: &mut Self::Context,
        vars: &VariableContainer,
        t: f64,
        k: usize,
    ) -> NlpResult<DVector<f64>>;

    fn bounds_at_instant(&self, t: f64, k: usize) -> Vec<Bounds>;

    /// Same contract as [`Constraint::depends_on`], for every instant.
    fn depends_on(&self, _set: &str) -> bool {
        true
    }

    /// `rows_per_instant() × |set|` block of instant `k`.
    fn jacobian_at_instant(
        &self,
        ctx: &mut Self::Context,
        vars: &VariableContainer,
        t: f64,
        k: usize,
        set: &str,
    ) -> NlpResult<DMatrix<f64>>;
}

pub struct TimeDiscretizationConstraint<H: InstantConstraint> {
    hook: H,
    variables: SharedVariables,
    horizon: f64,
    sampling: Sampling,
    times: Vec<f64>,
    parallel: bool,
    context: Mutex<H::Context>,
}

impl<H: InstantConstraint> TimeDiscretizationConstraint<H> {
    pub fn new(
        hook: H,
        variables: SharedVariables,
        horizon: f64,
        sampling: Sampling,
    ) -> NlpResult<Self> {
        if !(horizon.is_finite() && horizon > 0.0) {
            return Err(NlpError::InvalidInput(format!(
                "horizon must be positive and finite, got {horizon}"
            )));
        }
        match &sampling {
            Sampling::Fixed(times) => validate_times(times, horizon)?,
            Sampling::FromSchedule { dt } => validate_dt(*dt)?,
        }

        let context = Mutex::new(hook.context());
        let mut constraint = Self {
            hook,
            variables,
            horizon,
            sampling,
            times: Vec::new(),
            parallel: false,
            context,
        };
        constraint.times = constraint.compute_times()?;
        debug!(
            "{}: {} evaluation times, {} rows",
            constraint.hook.name(),
            constraint.times.len(),
            constraint.rows()
        );
        Ok(constraint)
    }

    /// Evaluate instants in parallel, one context per worker.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn hook(&self) -> &H {
        &self.hook
    }

    pub fn evaluation_times(&self) -> &[f64] {
        &self.times
    }

    fn compute_times(&self) -> NlpResult<Vec<f64>> {
        match &self.sampling {
            Sampling::Fixed(times) => Ok(times.clone()),
            Sampling::FromSchedule { dt } => {
                let vars = read_variables(&self.variables)?;
                schedule_times(&vars, self.horizon, *dt)
            }
        }
    }

    /// Run `f` once per instant, in evaluation-time order.
    fn evaluate_instants<T, F>(&self, f: F) -> NlpResult<Vec<T>>
    where
        T: Send,
        F: Fn(&mut H::Context, &VariableContainer, f64, usize) -> NlpResult<T> + Send + Sync,
    {
        let guard = read_variables(&self.variables)?;
        let vars: &VariableContainer = &guard;

        if self.parallel {
            self.times
                .par_iter()
                .enumerate()
                .map_init(|| self.hook.context(), |ctx, (k, &t)| f(ctx, vars, t, k))
                .collect()
        } else {
            let mut ctx = self.context.lock().map_err(|e| {
                NlpError::ThreadError(format!("Evaluation context poisoned: {e}"))
            })?;
            self.times
                .iter()
                .enumerate()
                .map(|(k, &t)| f(&mut *ctx, vars, t, k))
                .collect()
        }
    }
}

impl<H: InstantConstraint> Constraint for TimeDiscretizationConstraint<H> {
    fn name(&self) -> &str {
        self.hook.name()
    }

    fn rows(&self) -> usize {
        self.times.len() * self.hook.rows_per_instant()
    }

    fn values(&self) -> NlpResult<DVector<f64>> {
        let r = self.hook.rows_per_instant();
        let blocks = self.evaluate_instants(|ctx, vars, t, k| {
            self.hook.constraint_at_instant(ctx, vars, t, k)
        })?;

        let mut values = DVector::zeros(self.rows());
        for (k, block) in blocks.iter().enumerate() {
            if block.len() != r {
                return Err(NlpError::DimensionMismatch {
                    expected: r,
                    actual: block.len(),
                    context: format!("{} rows at instant {k}", self.hook.name()),
                });
            }
            values.rows_mut(k * r, r).copy_from(block);
        }
        Ok(values)
    }

    fn bounds(&self) -> NlpResult<Vec<Bounds>> {
        let r = self.hook.rows_per_instant();
        let mut bounds = Vec::with_capacity(self.rows());
        for (k, &t) in self.times.iter().enumerate() {
            let block = self.hook.bounds_at_instant(t, k);
            if block.len() != r {
                return Err(NlpError::DimensionMismatch {
                    expected: r,
                    actual: block.len(),
                    context: format!("{} bounds at instant {k}", self.hook.name()),
                });
            }
            bounds.extend(block);
        }
        Ok(bounds)
    }

    fn jacobian_block(&self, set: &str) -> NlpResult<DMatrix<f64>> {
        let r = self.hook.rows_per_instant();
        let cols = read_variables(&self.variables)?.set_len(set)?;
        let blocks = self.evaluate_instants(|ctx, vars, t, k| {
            self.hook.jacobian_at_instant(ctx, vars, t, k, set)
        })?;

        let mut jac = DMatrix::zeros(self.rows(), cols);
        for (k, block) in blocks.iter().enumerate() {
            check_block_shape(block, r, cols, &format!("{set} at instant {k}"))?;
            jac.view_mut((k * r, 0), (r, cols)).copy_from(block);
        }
        Ok(jac)
    }

    fn variables(&self) -> &SharedVariables {
        &self.variables
    }

    fn depends_on(&self, set: &str) -> bool {
        self.hook.depends_on(set)
    }

    fn update_variable_dependent_quantities(&mut self) -> NlpResult<()> {
        if let Sampling::FromSchedule { .. } = self.sampling {
            let times = self.compute_times()?;
            if times.len() != self.times.len() {
                debug!(
                    "{}: evaluation times changed from {} to {}",
                    self.hook.name(),
                    self.times.len(),
                    times.len()
                );
            }
            self.times = times;
        }
        Ok(())
    }
}

fn validate_dt(dt: f64) -> NlpResult<()> {
    if dt.is_finite() && dt > 0.0 {
        Ok(())
    } else {
        Err(NlpError::InvalidInput(format!(
            "sampling step must be positive and finite, got {dt}"
        )))
    }
}

fn validate_times(times: &[f64], horizon: f64) -> NlpResult<()> {
    if times.is_empty() {
        return Err(NlpError::InvalidInput(
            "at least one evaluation time is required".to_string(),
        ));
    }
    if let Some(t) = times
        .iter()
        .find(|t| !t.is_finite() || **t < 0.0 || **t > horizon + DUPLICATE_TOLERANCE)
    {
        return Err(NlpError::InvalidInput(format!(
            "evaluation time {t} is outside [0, {horizon}]"
        )));
    }
    if times.windows(2).any(|w| w[1] <= w[0]) {
        return Err(NlpError::InvalidInput(
            "evaluation times must be strictly increasing".to_string(),
        ));
    }
    Ok(())
}

/// `0, dt, 2·dt, …` below the horizon, then the horizon itself.
pub fn uniform_times(horizon: f64, dt: f64) -> NlpResult<Vec<f64>> {
    validate_dt(dt)?;
    let mut times: Vec<f64> = (0..)
        .map(|k| k as f64 * dt)
        .take_while(|t| *t < horizon - DUPLICATE_TOLERANCE)
        .collect();
    times.push(horizon);
    Ok(times)
}

/// Uniform grid merged with the interior switch times of every endeffector,
/// truncated where the shortest schedule ends.
pub fn schedule_times(vars: &VariableContainer, horizon: f64, dt: f64) -> NlpResult<Vec<f64>> {
    let mut times = uniform_times(horizon, dt)?;
    let mut end = horizon;

    for ee in 0..vars.ee_count() {
        let motion = vars.nodes(&ee_motion(ee))?;
        let Some(durations) = motion.phase_durations() else {
            continue;
        };
        end = end.min(motion.total_duration());
        let mut switch = 0.0;
        for d in &durations[..durations.len().saturating_sub(1)] {
            switch += d;
            times.push(switch);
        }
    }

    times.retain(|t| *t >= 0.0 && *t <= end + DUPLICATE_TOLERANCE);
    times.sort_by(f64::total_cmp);
    times.dedup_by(|later, earlier| (*later - *earlier).abs() < DUPLICATE_TOLERANCE);
    Ok(times)
}
