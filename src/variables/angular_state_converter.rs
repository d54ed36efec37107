//! Euler-angle spline to world-frame angular velocity and acceleration.
//!
//! The base orientation is parameterized by roll, pitch and yaw
//! `e = (φ, θ, ψ)` with `R = Rz(ψ)·Ry(θ)·Rx(φ)`. Angular velocity and
//! acceleration follow from
//!
//! ```text
//! ω = M(e)·ė
//! ω̇ = M(e)·ë + Ṁ(e, ė)·ė
//!
//!        | cθ·cψ  -sψ  0 |
//! M(e) = | cθ·sψ   cψ  0 |
//!        | -sθ     0   1 |
//! ```

use legged_splines::Dx;
use nalgebra::{DMatrix, Matrix3, Rotation3, Vector3};

use crate::error::{NlpError, NlpResult};
use crate::variables::NodeValues;

/// Converts the base-angular spline into the representation dynamic models use.
#[derive(Debug, Clone, Copy)]
pub struct AngularStateConverter<'a> {
    euler: &'a NodeValues,
}

impl<'a> AngularStateConverter<'a> {
    pub fn new(euler: &'a NodeValues) -> Self {
        Self { euler }
    }

    pub fn angular_velocity(&self, t: f64) -> NlpResult<Vector3<f64>> {
        let state = self.euler.state_at(t)?;
        Ok(mapping_matrix(&state.p) * state.v)
    }

    pub fn angular_acceleration(&self, t: f64) -> NlpResult<Vector3<f64>> {
        let state = self.euler.state_at(t)?;
        let m_dot = mapping_matrix_time_derivative(&state.p, &state.v);
        Ok(mapping_matrix(&state.p) * state.a + m_dot * state.v)
    }

    /// `3 × n` Jacobian of `ω(t)` w.r.t. the base-angular node variables.
    pub fn angular_velocity_jacobian(&self, t: f64) -> NlpResult<DMatrix<f64>> {
        let state = self.euler.state_at(t)?;
        let j_pos = self.euler.jacobian_wrt_nodes(t, Dx::Pos)?;
        let j_vel = self.euler.jacobian_wrt_nodes(t, Dx::Vel)?;

        let d_euler = columns_of_partials(&state.p, &state.v);
        Ok(to_dynamic(&d_euler) * j_pos + to_dynamic(&mapping_matrix(&state.p)) * j_vel)
    }

    /// `3 × n` Jacobian of `ω̇(t)` w.r.t. the base-angular node variables.
    pub fn angular_acceleration_jacobian(&self, t: f64) -> NlpResult<DMatrix<f64>> {
        let state = self.euler.state_at(t)?;
        let e = state.p;
        let e_dot = state.v;
        let j_pos = self.euler.jacobian_wrt_nodes(t, Dx::Pos)?;
        let j_vel = self.euler.jacobian_wrt_nodes(t, Dx::Vel)?;
        let j_acc = self.euler.jacobian_wrt_nodes(t, Dx::Acc)?;

        // d/de of M·ë and of Ṁ·ė
        let mut d_euler = columns_of_partials(&e, &state.a);
        for l in 0..3 {
            let mut column = Vector3::zeros();
            for k in 0..3 {
                column += mapping_matrix_second_derivative(&e, k, l) * e_dot * e_dot[k];
            }
            let mut target = d_euler.column_mut(l);
            target += column;
        }

        // d/dė of Ṁ·ė: Ṁ itself plus the columns ∂M/∂e_k·ė
        let d_euler_rate = mapping_matrix_time_derivative(&e, &e_dot) + columns_of_partials(&e, &e_dot);

        Ok(to_dynamic(&d_euler) * j_pos
            + to_dynamic(&d_euler_rate) * j_vel
            + to_dynamic(&mapping_matrix(&e)) * j_acc)
    }
}

fn to_dynamic(m: &Matrix3<f64>) -> DMatrix<f64> {
    DMatrix::from_column_slice(3, 3, m.as_slice())
}

/// Matrix whose column `k` is `∂M/∂e_k · w`.
fn columns_of_partials(e: &Vector3<f64>, w: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::from_columns(&[
        mapping_matrix_derivative(e, 0) * w,
        mapping_matrix_derivative(e, 1) * w,
        mapping_matrix_derivative(e, 2) * w,
    ])
}

/// Maps Euler rates to world-frame angular velocity.
pub fn mapping_matrix(e: &Vector3<f64>) -> Matrix3<f64> {
    let (st, ct) = e.y.sin_cos();
    let (sp, cp) = e.z.sin_cos();
    Matrix3::new(
        ct * cp, -sp, 0.0, //
        ct * sp, cp, 0.0, //
        -st, 0.0, 1.0,
    )
}

/// `∂M/∂e_k`.
fn mapping_matrix_derivative(e: &Vector3<f64>, k: usize) -> Matrix3<f64> {
    debug_assert!(k < 3, "Euler angle index {k} out of range");
    let (st, ct) = e.y.sin_cos();
    let (sp, cp) = e.z.sin_cos();
    match k {
        1 => Matrix3::new(
            -st * cp, 0.0, 0.0, //
            -st * sp, 0.0, 0.0, //
            -ct, 0.0, 0.0,
        ),
        2 => Matrix3::new(
            -ct * sp, -cp, 0.0, //
            ct * cp, -sp, 0.0, //
            0.0, 0.0, 0.0,
        ),
        // M does not depend on roll
        _ => Matrix3::zeros(),
    }
}

/// `∂²M/∂e_k∂e_l`.
fn mapping_matrix_second_derivative(e: &Vector3<f64>, k: usize, l: usize) -> Matrix3<f64> {
    debug_assert!(k < 3 && l < 3, "Euler angle index ({k}, {l}) out of range");
    let (st, ct) = e.y.sin_cos();
    let (sp, cp) = e.z.sin_cos();
    match (k.min(l), k.max(l)) {
        (1, 1) => Matrix3::new(
            -ct * cp, 0.0, 0.0, //
            -ct * sp, 0.0, 0.0, //
            st, 0.0, 0.0,
        ),
        (1, 2) => Matrix3::new(
            st * sp, 0.0, 0.0, //
            -st * cp, 0.0, 0.0, //
            0.0, 0.0, 0.0,
        ),
        (2, 2) => Matrix3::new(
            -ct * cp, sp, 0.0, //
            -ct * sp, -cp, 0.0, //
            0.0, 0.0, 0.0,
        ),
        _ => Matrix3::zeros(),
    }
}

/// `Ṁ = Σ_k ∂M/∂e_k · ė_k`.
fn mapping_matrix_time_derivative(e: &Vector3<f64>, e_dot: &Vector3<f64>) -> Matrix3<f64> {
    (0..3).fold(Matrix3::zeros(), |acc, k| {
        acc + mapping_matrix_derivative(e, k) * e_dot[k]
    })
}

/// Body-to-world rotation `Rz(ψ)·Ry(θ)·Rx(φ)`.
pub fn rotation_matrix(e: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::from_euler_angles(e.x, e.y, e.z).into_inner()
}

/// `∂R/∂e_k`, `k` one of 0 (roll), 1 (pitch) or 2 (yaw).
pub fn rotation_matrix_derivative(e: &Vector3<f64>, k: usize) -> NlpResult<Matrix3<f64>> {
    let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), e.x).into_inner();
    let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), e.y).into_inner();
    let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), e.z).into_inner();
    match k {
        0 => Ok(rz * ry * rx * Vector3::<f64>::x().cross_matrix()),
        1 => Ok(rz * ry * Vector3::<f64>::y().cross_matrix() * rx),
        2 => Ok(Vector3::<f64>::z().cross_matrix() * rz * ry * rx),
        _ => Err(NlpError::InvalidInput(format!(
            "Euler angle index {k} out of range 0..3"
        ))),
    }
}
