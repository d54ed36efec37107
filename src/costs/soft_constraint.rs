//! Constraint relaxed into a penalty.
//!
//! Each row contributes its signed bound violation `viol_i` (zero inside
//! the bounds), and the cost is `½·w·Σ viol_i²`. The gradient is
//! `w·Jᵀ·viol`, which is exact: the hinge is differentiable everywhere.

use nalgebra::DVector;

use crate::constraints::Constraint;
use crate::costs::polynomial::check_weight;
use crate::costs::Cost;
use crate::error::{NlpError, NlpResult};
use crate::variables::SharedVariables;

pub struct SoftConstraint {
    name: String,
    constraint: Box<dyn Constraint>,
    weight: f64,
}

impl SoftConstraint {
    pub fn new(constraint: Box<dyn Constraint>, weight: f64) -> NlpResult<Self> {
        check_weight(weight)?;
        Ok(Self {
            name: format!("soft-{}", constraint.name()),
            constraint,
            weight,
        })
    }

    pub fn constraint(&self) -> &dyn Constraint {
        self.constraint.as_ref()
    }

    fn violations(&self) -> NlpResult<DVector<f64>> {
        let values = self.constraint.values()?;
        let bounds = self.constraint.bounds()?;
        if bounds.len() != values.len() {
            return Err(NlpError::DimensionMismatch {
                expected: values.len(),
                actual: bounds.len(),
                context: format!("bounds of {}", self.constraint.name()),
            });
        }
        Ok(DVector::from_iterator(
            values.len(),
            values.iter().zip(&bounds).map(|(g, b)| b.violation(*g)),
        ))
    }
}

impl Cost for SoftConstraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn cost(&self) -> NlpResult<f64> {
        Ok(0.5 * self.weight * self.violations()?.norm_squared())
    }

    fn gradient_block(&self, set: &str) -> NlpResult<DVector<f64>> {
        let viol = self.violations()?;
        let jac = self.constraint.jacobian_block(set)?;
        Ok(jac.tr_mul(&viol) * self.weight)
    }

    fn variables(&self) -> &SharedVariables {
        self.constraint.variables()
    }

    fn update_variable_dependent_quantities(&mut self) -> NlpResult<()> {
        self.constraint.update_variable_dependent_quantities()
    }
}
