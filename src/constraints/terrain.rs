//! Endeffector nodes stay above the terrain and touch it in contact.

use std::sync::Arc;

use legged_splines::NodeEntry;
use nalgebra::{DMatrix, DVector};

use crate::constraints::Constraint;
use crate::error::NlpResult;
use crate::terrain::{Dim2, HeightMap};
use crate::variables::{ee_motion, read_variables, Bounds, SetId, SharedVariables};

#[derive(Debug, Clone, Copy)]
struct Row {
    ee: usize,
    node: usize,
    in_contact: bool,
}

/// `z − h(x, y) ≥ 0` per motion node, `= 0` for nodes bounding a contact phase.
pub struct TerrainConstraint {
    variables: SharedVariables,
    terrain: Arc<dyn HeightMap>,
    rows: Vec<Row>,
}

impl TerrainConstraint {
    pub fn new(variables: SharedVariables, terrain: Arc<dyn HeightMap>) -> NlpResult<Self> {
        let mut rows = Vec::new();
        {
            let vars = read_variables(&variables)?;
            for ee in 0..vars.ee_count() {
                let motion = vars.nodes(&ee_motion(ee))?;
                for node in 0..motion.node_count() {
                    // nodes of one stance share their position
                    let shared = node > 0
                        && motion.opt_index(node, NodeEntry::Value, 0)
                            == motion.opt_index(node - 1, NodeEntry::Value, 0);
                    if !shared {
                        rows.push(Row {
                            ee,
                            node,
                            in_contact: motion.node_in_contact(node),
                        });
                    }
                }
            }
        }
        Ok(Self {
            variables,
            terrain,
            rows,
        })
    }
}

impl Constraint for TerrainConstraint {
    fn name(&self) -> &str {
        "terrain"
    }

    fn rows(&self) -> usize {
        self.rows.len()
    }

    fn values(&self) -> NlpResult<DVector<f64>> {
        let vars = read_variables(&self.variables)?;
        let mut values = DVector::zeros(self.rows());
        for (i, row) in self.rows.iter().enumerate() {
            let motion = vars.nodes(&ee_motion(row.ee))?;
            if let Some(p) = motion.node_value(row.node) {
                values[i] = p.z - self.terrain.height_at(p.x, p.y);
            }
        }
        Ok(values)
    }

    fn bounds(&self) -> NlpResult<Vec<Bounds>> {
        Ok(self
            .rows
            .iter()
            .map(|row| {
                if row.in_contact {
                    Bounds::equality(0.0)
                } else {
                    Bounds::lower_only(0.0)
                }
            })
            .collect())
    }

    fn jacobian_block(&self, set: &str) -> NlpResult<DMatrix<f64>> {
        let vars = read_variables(&self.variables)?;
        let mut jac = DMatrix::zeros(self.rows(), vars.set_len(set)?);
        let Some(SetId::EeMotion(ee)) = SetId::parse(set) else {
            return Ok(jac);
        };

        let motion = vars.nodes(set)?;
        for (i, row) in self.rows.iter().enumerate().filter(|(_, r)| r.ee == ee) {
            let Some(p) = motion.node_value(row.node) else {
                continue;
            };
            let partials = [
                -self.terrain.derivative_at(Dim2::X, p.x, p.y),
                -self.terrain.derivative_at(Dim2::Y, p.x, p.y),
                1.0,
            ];
            for (dim, partial) in partials.into_iter().enumerate() {
                if let Some(col) = motion.opt_index(row.node, NodeEntry::Value, dim) {
                    jac[(i, col)] += partial;
                }
            }
        }
        Ok(jac)
    }

    fn variables(&self) -> &SharedVariables {
        &self.variables
    }

    fn depends_on(&self, set: &str) -> bool {
        matches!(
            SetId::parse(set),
            Some(SetId::EeMotion(ee)) if self.rows.iter().any(|r| r.ee == ee)
        )
    }
}
