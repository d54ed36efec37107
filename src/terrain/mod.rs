//! Terrain height maps.
//!
//! Constraints only see the [`HeightMap`] query interface: height and its
//! partial derivatives at a horizontal position. The normal is derived.

use std::fmt;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Horizontal direction of a height derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim2 {
    X,
    Y,
}

pub trait HeightMap: fmt::Debug + Send + Sync {
    fn height_at(&self, x: f64, y: f64) -> f64;

    /// `∂h/∂x` or `∂h/∂y`.
    fn derivative_at(&self, dim: Dim2, x: f64, y: f64) -> f64;

    /// Unit normal pointing away from the ground.
    fn normal_at(&self, x: f64, y: f64) -> Vector3<f64> {
        let n = Vector3::new(
            -self.derivative_at(Dim2::X, x, y),
            -self.derivative_at(Dim2::Y, x, y),
            1.0,
        );
        n.normalize()
    }
}

/// Horizontal plane at a fixed height.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FlatGround {
    pub height: f64,
}

impl FlatGround {
    pub fn new(height: f64) -> Self {
        Self { height }
    }
}

impl HeightMap for FlatGround {
    fn height_at(&self, _x: f64, _y: f64) -> f64 {
        self.height
    }

    fn derivative_at(&self, _dim: Dim2, _x: f64, _y: f64) -> f64 {
        0.0
    }
}

/// Flat ground that rises with constant slope along x after `start_x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Slope {
    pub start_x: f64,
    pub slope: f64,
}

impl Slope {
    pub fn new(start_x: f64, slope: f64) -> Self {
        Self { start_x, slope }
    }
}

impl HeightMap for Slope {
    fn height_at(&self, x: f64, _y: f64) -> f64 {
        if x > self.start_x {
            self.slope * (x - self.start_x)
        } else {
            0.0
        }
    }

    fn derivative_at(&self, dim: Dim2, x: f64, _y: f64) -> f64 {
        match dim {
            Dim2::X if x > self.start_x => self.slope,
            _ => 0.0,
        }
    }
}
