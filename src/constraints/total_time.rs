//! Phase durations of every optimized schedule sum to the horizon.

use nalgebra::{DMatrix, DVector};

use crate::constraints::Constraint;
use crate::error::NlpResult;
use crate::variables::{ee_schedule, read_variables, Bounds, SetId, SharedVariables};

/// One row per optimized contact schedule; no rows with fixed timings.
pub struct TotalTimeConstraint {
    variables: SharedVariables,
    horizon: f64,
    /// Endeffectors whose schedule is a variable set
    schedules: Vec<usize>,
}

impl TotalTimeConstraint {
    pub fn new(variables: SharedVariables, horizon: f64) -> NlpResult<Self> {
        let schedules = {
            let vars = read_variables(&variables)?;
            (0..vars.ee_count())
                .filter(|&ee| vars.contains(&ee_schedule(ee)))
                .collect()
        };
        Ok(Self {
            variables,
            horizon,
            schedules,
        })
    }
}

impl Constraint for TotalTimeConstraint {
    fn name(&self) -> &str {
        "total-time"
    }

    fn rows(&self) -> usize {
        self.schedules.len()
    }

    fn values(&self) -> NlpResult<DVector<f64>> {
        let vars = read_variables(&self.variables)?;
        let mut values = DVector::zeros(self.rows());
        for (row, &ee) in self.schedules.iter().enumerate() {
            values[row] = vars.schedule(&ee_schedule(ee))?.total_duration();
        }
        Ok(values)
    }

    fn bounds(&self) -> NlpResult<Vec<Bounds>> {
        Ok(vec![Bounds::equality(self.horizon); self.rows()])
    }

    fn jacobian_block(&self, set: &str) -> NlpResult<DMatrix<f64>> {
        let vars = read_variables(&self.variables)?;
        let cols = vars.set_len(set)?;
        let mut jac = DMatrix::zeros(self.rows(), cols);
        if let Some(SetId::EeSchedule(ee)) = SetId::parse(set) {
            if let Some(row) = self.schedules.iter().position(|&s| s == ee) {
                jac.row_mut(row).fill(1.0);
            }
        }
        Ok(jac)
    }

    fn variables(&self) -> &SharedVariables {
        &self.variables
    }

    fn depends_on(&self, set: &str) -> bool {
        matches!(SetId::parse(set), Some(SetId::EeSchedule(ee)) if self.schedules.contains(&ee))
    }
}
