//! Constraint components
//!
//! # Module Structure
//!
//! - `time_discretization`: evaluation scheme for constraints sampled along the horizon
//! - `dynamic`: rigid-body dynamics consistency (time-discretized)
//! - `range_of_motion`: kinematic box around the nominal stance (time-discretized)
//! - `state_boundary`: initial and final base state, initial endeffector positions
//! - `total_time`: phase durations sum to the horizon
//! - `terrain`: endeffector nodes above or on the terrain
//! - `swing`: swing-phase middle nodes between the surrounding footholds
//!
//! Every constraint reads its variables from the shared container and
//! returns one Jacobian block per variable set. Sets a constraint does not
//! depend on still get an explicit zero block of the right shape.

use nalgebra::{DMatrix, DVector};

use crate::error::{NlpError, NlpResult};
use crate::variables::{read_variables, Bounds, SharedVariables};

pub mod dynamic;
pub mod range_of_motion;
pub mod state_boundary;
pub mod swing;
pub mod terrain;
pub mod time_discretization;
pub mod total_time;

pub use dynamic::DynamicConstraint;
pub use range_of_motion::RangeOfMotionBox;
pub use state_boundary::StateBoundaryConstraint;
pub use swing::SwingConstraint;
pub use terrain::TerrainConstraint;
pub use time_discretization::{InstantConstraint, Sampling, TimeDiscretizationConstraint};
pub use total_time::TotalTimeConstraint;

/// A block of NLP constraint rows `lower ≤ g(x) ≤ upper`.
pub trait Constraint: Send + Sync {
    fn name(&self) -> &str;

    /// Number of rows at the current variable values.
    fn rows(&self) -> usize;

    fn values(&self) -> NlpResult<DVector<f64>>;

    fn bounds(&self) -> NlpResult<Vec<Bounds>>;

    /// `rows() × |set|` Jacobian w.r.t. the variable set `set`.
    fn jacobian_block(&self, set: &str) -> NlpResult<DMatrix<f64>>;

    /// Container this constraint reads from.
    fn variables(&self) -> &SharedVariables;

    /// Whether the Jacobian block of `set` can be nonzero for any variable
    /// values. Blocks of such sets belong to the fixed sparsity structure of
    /// the stacked Jacobian, zeros included.
    fn depends_on(&self, _set: &str) -> bool {
        true
    }

    /// Refresh quantities derived from the variables, such as evaluation times.
    fn update_variable_dependent_quantities(&mut self) -> NlpResult<()> {
        Ok(())
    }

    /// Dense Jacobian over every variable set in column order.
    fn jacobian(&self) -> NlpResult<DMatrix<f64>> {
        let (layout, total) = {
            let vars = read_variables(self.variables())?;
            (vars.layout(), vars.total_len())
        };
        let rows = self.rows();
        let mut jac = DMatrix::zeros(rows, total);
        for (name, offset, size) in layout {
            let block = self.jacobian_block(&name)?;
            check_block_shape(&block, rows, size, &name)?;
            jac.view_mut((0, offset), (rows, size)).copy_from(&block);
        }
        Ok(jac)
    }
}

/// Fail with `DimensionMismatch` when a block disagrees with the layout.
pub(crate) fn check_block_shape(
    block: &DMatrix<f64>,
    rows: usize,
    cols: usize,
    context: &str,
) -> NlpResult<()> {
    if block.nrows() != rows {
        return Err(NlpError::DimensionMismatch {
            expected: rows,
            actual: block.nrows(),
            context: format!("rows of block {context}"),
        });
    }
    if block.ncols() != cols {
        return Err(NlpError::DimensionMismatch {
            expected: cols,
            actual: block.ncols(),
            context: format!("columns of block {context}"),
        });
    }
    Ok(())
}

/// Copy a `3 × n` block into rows `row..row + 3` of `target`, scaled by `scale`.
pub(crate) fn add_rows(target: &mut DMatrix<f64>, row: usize, block: &DMatrix<f64>, scale: f64) {
    let mut view = target.view_mut((row, 0), (block.nrows(), block.ncols()));
    view += block * scale;
}
