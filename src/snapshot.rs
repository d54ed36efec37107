//! Sampled trajectory for external viewers.
//!
//! A snapshot carries the base motion curve, endeffector positions with
//! their contact flags, and the support polygon at every sample. It is
//! plain serde data; no renderer format is assumed.

use std::fs;
use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constraints::time_discretization::{uniform_times, DUPLICATE_TOLERANCE};
use crate::error::NlpResult;
use crate::variables::{ee_force, ee_motion, VariableContainer, BASE_ANG, BASE_LIN};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndeffectorSample {
    pub position: Vector3<f64>,
    pub force: Vector3<f64>,
    pub in_contact: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySample {
    pub t: f64,
    pub base_position: Vector3<f64>,
    /// Roll, pitch, yaw
    pub base_euler: Vector3<f64>,
    pub endeffectors: Vec<EndeffectorSample>,
    /// Contact points ordered counter-clockwise around their centroid
    pub support_polygon: Vec<Vector3<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySnapshot {
    pub dt: f64,
    pub samples: Vec<TrajectorySample>,
}

impl TrajectorySnapshot {
    /// Sample every `dt` up to the end of the shortest trajectory.
    pub fn from_variables(vars: &VariableContainer, dt: f64) -> NlpResult<Self> {
        let base_lin = vars.nodes(BASE_LIN)?;
        let base_ang = vars.nodes(BASE_ANG)?;
        let ee_count = vars.ee_count();

        let mut end = base_lin.total_duration();
        for ee in 0..ee_count {
            end = end.min(vars.nodes(&ee_motion(ee))?.total_duration());
        }

        let mut samples = Vec::new();
        for t in uniform_times(end, dt)? {
            let mut endeffectors = Vec::with_capacity(ee_count);
            for ee in 0..ee_count {
                let motion = vars.nodes(&ee_motion(ee))?;
                let force = vars.nodes(&ee_force(ee))?;
                // force spline may end a hair before the motion spline
                let t_force = t.min(force.total_duration());
                endeffectors.push(EndeffectorSample {
                    position: motion.state_at(t)?.p,
                    force: force.state_at(t_force)?.p,
                    in_contact: motion.in_contact_at(t).unwrap_or(false),
                });
            }
            samples.push(TrajectorySample {
                t,
                base_position: base_lin.state_at(t)?.p,
                base_euler: base_ang.state_at(t)?.p,
                support_polygon: support_polygon(&endeffectors),
                endeffectors,
            });
        }
        Ok(Self { dt, samples })
    }

    pub fn to_json(&self) -> NlpResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> NlpResult<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Last sample time.
    pub fn duration(&self) -> f64 {
        self.samples.last().map_or(0.0, |s| s.t)
    }
}

/// Contact points sorted by angle around their xy centroid.
pub fn support_polygon(endeffectors: &[EndeffectorSample]) -> Vec<Vector3<f64>> {
    let mut points: Vec<Vector3<f64>> = endeffectors
        .iter()
        .filter(|ee| ee.in_contact)
        .map(|ee| ee.position)
        .collect();
    if points.len() < 3 {
        return points;
    }
    let centroid = points.iter().sum::<Vector3<f64>>() / points.len() as f64;
    let angle = |p: &Vector3<f64>| (p.y - centroid.y).atan2(p.x - centroid.x);
    points.sort_by(|a, b| angle(a).total_cmp(&angle(b)));
    points.dedup_by(|a, b| (*a - *b).norm() < DUPLICATE_TOLERANCE);
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::MotionParameters;
    use crate::variables::{build_variables, BaseState};
    use approx::assert_relative_eq;

    fn contact(x: f64, y: f64) -> EndeffectorSample {
        EndeffectorSample {
            position: Vector3::new(x, y, 0.0),
            force: Vector3::zeros(),
            in_contact: true,
        }
    }

    #[test]
    fn test_support_polygon_is_ordered_by_angle() {
        let mut swing = contact(5.0, 5.0);
        swing.in_contact = false;
        let feet = [
            contact(1.0, 1.0),
            contact(-1.0, -1.0),
            swing,
            contact(1.0, -1.0),
            contact(-1.0, 1.0),
        ];
        let polygon = support_polygon(&feet);
        assert_eq!(polygon.len(), 4);
        assert_eq!(polygon[0], Vector3::new(-1.0, -1.0, 0.0));
        assert_eq!(polygon[1], Vector3::new(1.0, -1.0, 0.0));
        assert_eq!(polygon[2], Vector3::new(1.0, 1.0, 0.0));
        assert_eq!(polygon[3], Vector3::new(-1.0, 1.0, 0.0));
    }

    #[test]
    fn test_snapshot_samples_whole_horizon() {
        let params = MotionParameters::default();
        let start = BaseState::at_rest(Vector3::new(0.0, 0.0, 0.58), Vector3::zeros());
        let goal = BaseState::at_rest(Vector3::new(0.4, 0.0, 0.58), Vector3::zeros());
        let vars = build_variables(&params, &start, &goal, &[Vector3::zeros()]).unwrap();

        let snapshot = TrajectorySnapshot::from_variables(&vars, 0.25).unwrap();
        assert_eq!(snapshot.samples.len(), 5);
        assert_relative_eq!(snapshot.duration(), 1.0);
        assert!(snapshot.samples[0].endeffectors[0].in_contact);
        assert!(!snapshot.samples[2].endeffectors[0].in_contact);
        assert_eq!(snapshot.samples[2].support_polygon.len(), 0);
        assert_relative_eq!(snapshot.samples[4].base_position.x, 0.4, epsilon = 1e-12);

        let json = snapshot.to_json().unwrap();
        let back: TrajectorySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.samples.len(), 5);
    }
}
