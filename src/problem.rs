//! Stacking of costs and constraints into one NLP.
//!
//! Constraint rows are concatenated in insertion order; columns follow the
//! variable container layout. The stacked Jacobian is sparse (faer
//! `SparseColMat` built from triplets): most blocks of a legged-robot
//! formulation are zero. Its pattern holds the full block of every set a
//! constraint depends on and does not change with the variable values.

use std::sync::Arc;

use faer::sparse::{SparseColMat, Triplet};
use nalgebra::{DMatrix, DVector};
use tracing::info;

use crate::constraints::Constraint;
use crate::costs::Cost;
use crate::error::{NlpError, NlpResult};
use crate::variables::{read_variables, write_variables, Bounds, SharedVariables};

pub struct Problem {
    variables: SharedVariables,
    constraints: Vec<Box<dyn Constraint>>,
    costs: Vec<Box<dyn Cost>>,
}

impl Problem {
    pub fn new(variables: SharedVariables) -> Self {
        Self {
            variables,
            constraints: Vec::new(),
            costs: Vec::new(),
        }
    }

    fn check_container(&self, variables: &SharedVariables, name: &str) -> NlpResult<()> {
        if Arc::ptr_eq(variables, &self.variables) {
            Ok(())
        } else {
            Err(NlpError::InvalidInput(format!(
                "component {name} reads a different variable container"
            )))
        }
    }

    pub fn add_constraint(&mut self, constraint: Box<dyn Constraint>) -> NlpResult<()> {
        self.check_container(constraint.variables(), constraint.name())?;
        self.constraints.push(constraint);
        Ok(())
    }

    pub fn add_cost(&mut self, cost: Box<dyn Cost>) -> NlpResult<()> {
        self.check_container(cost.variables(), cost.name())?;
        self.costs.push(cost);
        Ok(())
    }

    pub fn variables(&self) -> &SharedVariables {
        &self.variables
    }

    pub fn constraints(&self) -> &[Box<dyn Constraint>] {
        &self.constraints
    }

    pub fn costs(&self) -> &[Box<dyn Cost>] {
        &self.costs
    }

    pub fn variable_count(&self) -> NlpResult<usize> {
        Ok(read_variables(&self.variables)?.total_len())
    }

    pub fn variable_values(&self) -> NlpResult<DVector<f64>> {
        Ok(read_variables(&self.variables)?.values())
    }

    pub fn variable_bounds(&self) -> NlpResult<Vec<Bounds>> {
        Ok(read_variables(&self.variables)?.bounds())
    }

    /// Write new solver iterate, then refresh every variable-dependent quantity
    /// (evaluation times may change when phase durations are optimized).
    pub fn set_variables(&mut self, values: &DVector<f64>) -> NlpResult<()> {
        write_variables(&self.variables)?.set_values(values)?;
        for constraint in &mut self.constraints {
            constraint.update_variable_dependent_quantities()?;
        }
        for cost in &mut self.costs {
            cost.update_variable_dependent_quantities()?;
        }
        Ok(())
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.iter().map(|c| c.rows()).sum()
    }

    pub fn constraint_values(&self) -> NlpResult<DVector<f64>> {
        let mut values = DVector::zeros(self.constraint_count());
        let mut row = 0;
        for constraint in &self.constraints {
            let block = constraint.values()?;
            values.rows_mut(row, block.len()).copy_from(&block);
            row += block.len();
        }
        Ok(values)
    }

    pub fn constraint_bounds(&self) -> NlpResult<Vec<Bounds>> {
        let mut bounds = Vec::with_capacity(self.constraint_count());
        for constraint in &self.constraints {
            bounds.extend(constraint.bounds()?);
        }
        Ok(bounds)
    }

    /// `(row, column)` of every structural entry of the stacked Jacobian.
    ///
    /// A constraint contributes its full block for every set it depends on,
    /// so the pattern only changes when a row count changes, never with the
    /// variable values.
    pub fn jacobian_structure(&self) -> NlpResult<Vec<(usize, usize)>> {
        let layout = read_variables(&self.variables)?.layout();
        let mut structure = Vec::new();
        let mut row_offset = 0;
        for constraint in &self.constraints {
            let rows = constraint.rows();
            for (name, col_offset, size) in &layout {
                if !constraint.depends_on(name) {
                    continue;
                }
                for col in 0..*size {
                    structure.extend((0..rows).map(|row| (row_offset + row, col_offset + col)));
                }
            }
            row_offset += rows;
        }
        Ok(structure)
    }

    /// Stacked constraint Jacobian on the fixed [`Problem::jacobian_structure`],
    /// explicit zeros kept.
    pub fn jacobian(&self) -> NlpResult<SparseColMat<usize, f64>> {
        let (layout, total) = {
            let vars = read_variables(&self.variables)?;
            (vars.layout(), vars.total_len())
        };
        let mut triplets = Vec::new();
        let mut row_offset = 0;
        for constraint in &self.constraints {
            let rows = constraint.rows();
            for (name, col_offset, size) in &layout {
                if !constraint.depends_on(name) {
                    continue;
                }
                let block = constraint.jacobian_block(name)?;
                crate::constraints::check_block_shape(&block, rows, *size, name)?;
                for col in 0..block.ncols() {
                    for row in 0..block.nrows() {
                        triplets.push(Triplet::new(
                            row_offset + row,
                            col_offset + col,
                            block[(row, col)],
                        ));
                    }
                }
            }
            row_offset += rows;
        }

        SparseColMat::try_new_from_triplets(row_offset, total, &triplets).map_err(|e| {
            NlpError::Computation(format!("Failed to build constraint Jacobian: {e:?}"))
        })
    }

    /// Stacked constraint Jacobian as a dense matrix.
    pub fn dense_jacobian(&self) -> NlpResult<DMatrix<f64>> {
        let total = self.variable_count()?;
        let mut jac = DMatrix::zeros(self.constraint_count(), total);
        let mut row = 0;
        for constraint in &self.constraints {
            let block = constraint.jacobian()?;
            jac.view_mut((row, 0), (block.nrows(), total)).copy_from(&block);
            row += block.nrows();
        }
        Ok(jac)
    }

    pub fn cost(&self) -> NlpResult<f64> {
        self.costs.iter().map(|c| c.cost()).sum()
    }

    pub fn gradient(&self) -> NlpResult<DVector<f64>> {
        let mut gradient = DVector::zeros(self.variable_count()?);
        for cost in &self.costs {
            gradient += cost.gradient()?;
        }
        Ok(gradient)
    }

    pub fn log_summary(&self) -> NlpResult<()> {
        info!(
            "Problem: {} variables, {} constraint rows in {} component(s), {} cost(s)",
            self.variable_count()?,
            self.constraint_count(),
            self.constraints.len(),
            self.costs.len()
        );
        for constraint in &self.constraints {
            info!("  constraint {:<16} {:>5} rows", constraint.name(), constraint.rows());
        }
        for cost in &self.costs {
            info!("  cost       {:<16} {:>12.6e}", cost.name(), cost.cost()?);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{TerrainConstraint, TotalTimeConstraint};
    use crate::parameters::MotionParameters;
    use crate::terrain::FlatGround;
    use crate::variables::{build_variables, ee_motion, ee_schedule, BaseState};
    use nalgebra::Vector3;

    fn shared() -> SharedVariables {
        let params = MotionParameters::default().with_optimize_timings(true);
        let start = BaseState::at_rest(Vector3::new(0.0, 0.0, 0.5), Vector3::zeros());
        build_variables(&params, &start, &start, &[Vector3::zeros()])
            .unwrap()
            .into_shared()
    }

    #[test]
    fn test_foreign_container_is_rejected() {
        let mut problem = Problem::new(shared());
        let other = TotalTimeConstraint::new(shared(), 1.0).unwrap();
        assert!(matches!(
            problem.add_constraint(Box::new(other)),
            Err(NlpError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_set_variables_updates_values() {
        let vars = shared();
        let mut problem = Problem::new(vars.clone());
        problem
            .add_constraint(Box::new(TotalTimeConstraint::new(vars.clone(), 1.0).unwrap()))
            .unwrap();
        assert_eq!(problem.constraint_count(), 1);

        let mut x = problem.variable_values().unwrap();
        let offset = read_variables(&vars)
            .unwrap()
            .column_offset(&ee_schedule(0))
            .unwrap();
        x[offset] += 0.1;
        problem.set_variables(&x).unwrap();
        assert!((problem.constraint_values().unwrap()[0] - 1.1).abs() < 1e-12);

        let jac = problem.jacobian().unwrap();
        assert_eq!(jac.nrows(), 1);
        assert_eq!(jac.ncols(), x.len());
        let nnz: usize = (0..jac.ncols()).map(|col| jac.val_of_col(col).len()).sum();
        assert_eq!(nnz, 3);
        assert_eq!(problem.jacobian_structure().unwrap().len(), 3);
    }

    #[test]
    fn test_jacobian_keeps_explicit_zeros() {
        let vars = shared();
        let mut problem = Problem::new(vars.clone());
        let terrain = TerrainConstraint::new(vars.clone(), Arc::new(FlatGround::default())).unwrap();
        problem.add_constraint(Box::new(terrain)).unwrap();

        let jac = problem.jacobian().unwrap();
        let nnz: usize = (0..jac.ncols()).map(|col| jac.val_of_col(col).len()).sum();
        let motion_len = read_variables(&vars).unwrap().set_len(&ee_motion(0)).unwrap();
        assert_eq!(nnz, problem.constraint_count() * motion_len);
        assert_eq!(nnz, problem.jacobian_structure().unwrap().len());

        let explicit_zeros = (0..jac.ncols())
            .flat_map(|col| jac.val_of_col(col).iter())
            .filter(|v| **v == 0.0)
            .count();
        assert!(explicit_zeros > 0);
    }
}
