//! Per-endeffector sequence of contact and swing phase durations.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{NlpError, NlpResult};
use crate::variables::Bounds;

/// Phase durations of one endeffector, alternating contact and swing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactSchedule {
    durations: Vec<f64>,
    in_contact_at_start: bool,
    min_phase_duration: f64,
    max_phase_duration: f64,
}

impl ContactSchedule {
    pub fn new(
        durations: Vec<f64>,
        in_contact_at_start: bool,
        min_phase_duration: f64,
        max_phase_duration: f64,
    ) -> NlpResult<Self> {
        if durations.is_empty() {
            return Err(NlpError::InvalidInput(
                "contact schedule needs at least one phase".to_string(),
            ));
        }
        check_durations(&durations)?;
        Ok(Self {
            durations,
            in_contact_at_start,
            min_phase_duration,
            max_phase_duration,
        })
    }

    pub fn durations(&self) -> &[f64] {
        &self.durations
    }

    pub fn phase_count(&self) -> usize {
        self.durations.len()
    }

    pub fn in_contact_at_start(&self) -> bool {
        self.in_contact_at_start
    }

    pub fn total_duration(&self) -> f64 {
        self.durations.iter().sum()
    }

    /// Cumulative end time of every phase.
    pub fn phase_end_times(&self) -> Vec<f64> {
        self.durations
            .iter()
            .scan(0.0, |end, d| {
                *end += d;
                Some(*end)
            })
            .collect()
    }

    /// Times at which contact switches, i.e. every phase end but the last.
    pub fn switch_times(&self) -> Vec<f64> {
        let mut ends = self.phase_end_times();
        ends.pop();
        ends
    }

    pub fn is_contact_phase(&self, phase: usize) -> bool {
        is_contact_phase(self.in_contact_at_start, phase)
    }

    /// Phase active at time `t`; a switch instant belongs to the earlier phase.
    pub fn phase_at(&self, t: f64) -> usize {
        phase_at(&self.durations, t)
    }

    pub fn in_contact_at(&self, t: f64) -> bool {
        self.is_contact_phase(self.phase_at(t))
    }

    pub fn values(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.durations)
    }

    pub fn set_values(&mut self, values: &[f64]) -> NlpResult<()> {
        if values.len() != self.durations.len() {
            return Err(NlpError::DimensionMismatch {
                expected: self.durations.len(),
                actual: values.len(),
                context: "contact schedule values".to_string(),
            });
        }
        check_durations(values)?;
        self.durations.copy_from_slice(values);
        Ok(())
    }

    pub fn bounds(&self) -> Vec<Bounds> {
        vec![Bounds::new(self.min_phase_duration, self.max_phase_duration); self.durations.len()]
    }
}

pub(crate) fn is_contact_phase(in_contact_at_start: bool, phase: usize) -> bool {
    (phase % 2 == 0) == in_contact_at_start
}

pub(crate) fn phase_at(durations: &[f64], t: f64) -> usize {
    let mut end = 0.0;
    for (phase, d) in durations.iter().enumerate() {
        end += d;
        if t <= end + legged_splines::TIME_TOLERANCE {
            return phase;
        }
    }
    durations.len().saturating_sub(1)
}

/// Every phase carries at least one polynomial, so it needs a positive length.
fn check_durations(durations: &[f64]) -> NlpResult<()> {
    match durations.iter().find(|d| !(d.is_finite() && **d > 0.0)) {
        Some(bad) => Err(NlpError::InvalidInput(format!(
            "phase durations must be positive and finite, got {bad}"
        ))),
        None => Ok(()),
    }
}
