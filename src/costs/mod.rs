//! Cost components
//!
//! # Module Structure
//!
//! - `polynomial`: quadratic forms over spline node values
//! - `soft_constraint`: a constraint turned into a quadratic penalty
//!
//! A cost is a scalar `f(x)` read from the shared container plus one
//! gradient block per variable set. Sets a cost does not depend on get an
//! explicit zero block.

use nalgebra::DVector;

use crate::error::{NlpError, NlpResult};
use crate::variables::{read_variables, SharedVariables};

pub mod polynomial;
pub mod soft_constraint;

pub use polynomial::{QuadraticForm, QuadraticPolynomialCost};
pub use soft_constraint::SoftConstraint;

/// A scalar term of the NLP objective.
pub trait Cost: Send + Sync {
    fn name(&self) -> &str;

    fn cost(&self) -> NlpResult<f64>;

    /// `∂f/∂x` restricted to the variable set `set`.
    fn gradient_block(&self, set: &str) -> NlpResult<DVector<f64>>;

    fn variables(&self) -> &SharedVariables;

    fn update_variable_dependent_quantities(&mut self) -> NlpResult<()> {
        Ok(())
    }

    /// Gradient over every variable set in column order.
    fn gradient(&self) -> NlpResult<DVector<f64>> {
        let (layout, total) = {
            let vars = read_variables(self.variables())?;
            (vars.layout(), vars.total_len())
        };
        let mut gradient = DVector::zeros(total);
        for (name, offset, size) in layout {
            let block = self.gradient_block(&name)?;
            if block.len() != size {
                return Err(NlpError::DimensionMismatch {
                    expected: size,
                    actual: block.len(),
                    context: format!("gradient block {name} of {}", self.name()),
                });
            }
            gradient.rows_mut(offset, size).copy_from(&block);
        }
        Ok(gradient)
    }
}

/// Sum of several costs over the same container.
pub struct CompositeCost {
    name: String,
    variables: SharedVariables,
    terms: Vec<Box<dyn Cost>>,
}

impl CompositeCost {
    pub fn new(name: impl Into<String>, variables: SharedVariables) -> Self {
        Self {
            name: name.into(),
            variables,
            terms: Vec::new(),
        }
    }

    pub fn add(&mut self, term: Box<dyn Cost>) {
        self.terms.push(term);
    }

    pub fn with_term(mut self, term: Box<dyn Cost>) -> Self {
        self.add(term);
        self
    }

    pub fn terms(&self) -> &[Box<dyn Cost>] {
        &self.terms
    }
}

impl Cost for CompositeCost {
    fn name(&self) -> &str {
        &self.name
    }

    fn cost(&self) -> NlpResult<f64> {
        self.terms.iter().map(|term| term.cost()).sum()
    }

    fn gradient_block(&self, set: &str) -> NlpResult<DVector<f64>> {
        let size = read_variables(&self.variables)?.set_len(set)?;
        let mut block = DVector::zeros(size);
        for term in &self.terms {
            block += term.gradient_block(set)?;
        }
        Ok(block)
    }

    fn variables(&self) -> &SharedVariables {
        &self.variables
    }

    fn update_variable_dependent_quantities(&mut self) -> NlpResult<()> {
        self.terms
            .iter_mut()
            .try_for_each(|term| term.update_variable_dependent_quantities())
    }
}
