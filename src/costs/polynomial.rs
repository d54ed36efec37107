//! Quadratic costs on spline node values.
//!
//! Every spline quantity is linear in the node variables, so integrating a
//! squared derivative over the horizon yields an exact quadratic form
//! `xᵀMx` that is assembled once and evaluated against fresh values.

use legged_splines::Dx;
use nalgebra::{DMatrix, DVector};

use crate::constraints::time_discretization::uniform_times;
use crate::costs::Cost;
use crate::error::{NlpError, NlpResult};
use crate::variables::{read_variables, NodeValues, SharedVariables};

/// `xᵀ·matrix·x + vectorᵀ·x`. The matrix need not be symmetric.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadraticForm {
    pub matrix: DMatrix<f64>,
    pub vector: DVector<f64>,
}

pub(crate) fn check_weight(weight: f64) -> NlpResult<()> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(())
    } else {
        Err(NlpError::InvalidWeight(weight))
    }
}

impl QuadraticForm {
    pub fn new(matrix: DMatrix<f64>, vector: DVector<f64>) -> NlpResult<Self> {
        if !matrix.is_square() {
            return Err(NlpError::DimensionMismatch {
                expected: matrix.nrows(),
                actual: matrix.ncols(),
                context: "columns of quadratic form".to_string(),
            });
        }
        if vector.len() != matrix.nrows() {
            return Err(NlpError::DimensionMismatch {
                expected: matrix.nrows(),
                actual: vector.len(),
                context: "linear term of quadratic form".to_string(),
            });
        }
        Ok(Self { matrix, vector })
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    /// `M = Σ_k dt·A_kᵀ·W·A_k` where `A_k` maps the node variables to
    /// quantity `dx` at grid time `k·dt`, and `W = diag(weight_dims)`.
    pub fn integrated_derivative(
        values: &NodeValues,
        dx: Dx,
        weight_dims: [f64; 3],
        dt: f64,
    ) -> NlpResult<Self> {
        for w in weight_dims {
            check_weight(w)?;
        }
        let n = values.len();
        let weights = DMatrix::from_diagonal(&DVector::from_column_slice(&weight_dims));
        let mut matrix = DMatrix::zeros(n, n);
        for t in uniform_times(values.total_duration(), dt)? {
            let a = values.jacobian_wrt_nodes(t, dx)?;
            matrix += a.transpose() * &weights * &a * dt;
        }
        Self::new(matrix, DVector::zeros(n))
    }

    /// Diagonal form penalizing the squared node values (not derivatives),
    /// weighted per dimension.
    pub fn diagonal_on_values(values: &NodeValues, weight_dims: [f64; 3]) -> NlpResult<Self> {
        for w in weight_dims {
            check_weight(w)?;
        }
        let n = values.len();
        let mut matrix = DMatrix::zeros(n, n);
        for (id, dim) in values.value_indices() {
            matrix[(id, id)] = weight_dims[dim];
        }
        Self::new(matrix, DVector::zeros(n))
    }
}

/// `weight·(xᵀMx + vᵀx)` on one variable set.
pub struct QuadraticPolynomialCost {
    name: String,
    set: String,
    form: QuadraticForm,
    weight: f64,
    variables: SharedVariables,
}

impl QuadraticPolynomialCost {
    pub fn new(
        variables: SharedVariables,
        set: impl Into<String>,
        form: QuadraticForm,
        weight: f64,
    ) -> NlpResult<Self> {
        check_weight(weight)?;
        let set = set.into();
        let size = read_variables(&variables)?.set_len(&set)?;
        if size != form.dim() {
            return Err(NlpError::DimensionMismatch {
                expected: size,
                actual: form.dim(),
                context: format!("quadratic form on {set}"),
            });
        }
        Ok(Self {
            name: format!("polynomial-{set}"),
            set,
            form,
            weight,
            variables,
        })
    }

    pub fn set(&self) -> &str {
        &self.set
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn form(&self) -> &QuadraticForm {
        &self.form
    }
}

impl Cost for QuadraticPolynomialCost {
    fn name(&self) -> &str {
        &self.name
    }

    fn cost(&self) -> NlpResult<f64> {
        let x = read_variables(&self.variables)?.values_of(&self.set)?;
        let quadratic = x.dot(&(&self.form.matrix * &x));
        Ok(self.weight * (quadratic + self.form.vector.dot(&x)))
    }

    fn gradient_block(&self, set: &str) -> NlpResult<DVector<f64>> {
        let vars = read_variables(&self.variables)?;
        if set != self.set {
            return Ok(DVector::zeros(vars.set_len(set)?));
        }
        let x = vars.values_of(set)?;
        let m = &self.form.matrix;
        Ok((m * &x + m.tr_mul(&x) + &self.form.vector) * self.weight)
    }

    fn variables(&self) -> &SharedVariables {
        &self.variables
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::MotionParameters;
    use crate::variables::{
        build_variables, ee_force, write_variables, BaseState, ContactSchedule, VariableContainer,
        VariableSet, BASE_LIN,
    };
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector, Vector3};

    const FD_STEP: f64 = 1e-6;

    fn schedule_only() -> SharedVariables {
        let mut container = VariableContainer::new();
        let schedule = ContactSchedule::new(vec![0.4, 0.6], true, 0.1, 1.0).unwrap();
        container
            .add("ee-schedule_0", VariableSet::Schedule(schedule))
            .unwrap();
        container.into_shared()
    }

    fn formulation(goal: Vector3<f64>) -> SharedVariables {
        let params = MotionParameters::default().with_base_segment_count(4);
        let start = BaseState::at_rest(Vector3::new(0.0, 0.0, 0.5), Vector3::zeros());
        let goal = BaseState::at_rest(goal, Vector3::zeros());
        build_variables(&params, &start, &goal, &[Vector3::zeros()])
            .unwrap()
            .into_shared()
    }

    #[test]
    fn test_nonsymmetric_form_value_and_gradient() {
        let vars = schedule_only();
        let form = QuadraticForm::new(dmatrix![1.0, 2.0; 0.0, 3.0], dvector![1.0, -1.0]).unwrap();
        let cost = QuadraticPolynomialCost::new(vars, "ee-schedule_0", form, 2.0).unwrap();

        // x = (0.4, 0.6): xᵀMx = 1.72, vᵀx = -0.2
        assert_relative_eq!(cost.cost().unwrap(), 3.04, epsilon = 1e-12);
        assert_relative_eq!(
            cost.gradient_block("ee-schedule_0").unwrap(),
            dvector![6.0, 6.8],
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_rejects_bad_weight_and_shape() {
        let vars = schedule_only();
        let form = QuadraticForm::new(DMatrix::identity(2, 2), DVector::zeros(2)).unwrap();
        assert!(matches!(
            QuadraticPolynomialCost::new(vars.clone(), "ee-schedule_0", form.clone(), -1.0),
            Err(NlpError::InvalidWeight(_))
        ));
        assert!(matches!(
            QuadraticPolynomialCost::new(vars.clone(), "ee-schedule_0", form.clone(), f64::NAN),
            Err(NlpError::InvalidWeight(_))
        ));
        assert!(matches!(
            QuadraticPolynomialCost::new(vars, "missing", form, 1.0),
            Err(NlpError::UnknownVariableSet(_))
        ));
        assert!(matches!(
            QuadraticForm::new(DMatrix::identity(2, 2), DVector::zeros(3)),
            Err(NlpError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_resting_base_has_zero_acceleration_cost() {
        let vars = formulation(Vector3::new(0.0, 0.0, 0.5));
        let form = {
            let guard = read_variables(&vars).unwrap();
            let base = guard.nodes(BASE_LIN).unwrap();
            let form = QuadraticForm::integrated_derivative(base, Dx::Acc, [1.0; 3], 0.1).unwrap();
            form
        };
        assert_relative_eq!(form.matrix, form.matrix.transpose(), epsilon = 1e-12);
        let cost = QuadraticPolynomialCost::new(vars, BASE_LIN, form, 1.0).unwrap();
        assert_relative_eq!(cost.cost().unwrap(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let vars = formulation(Vector3::new(0.6, 0.2, 0.4));
        let form = {
            let guard = read_variables(&vars).unwrap();
            let base = guard.nodes(BASE_LIN).unwrap();
            let form =
                QuadraticForm::integrated_derivative(base, Dx::Acc, [1.0, 2.0, 0.5], 0.1).unwrap();
            form
        };
        let cost = QuadraticPolynomialCost::new(vars.clone(), BASE_LIN, form, 0.7).unwrap();
        assert!(cost.cost().unwrap() > 0.0);

        let analytic = cost.gradient_block(BASE_LIN).unwrap();
        let x = read_variables(&vars).unwrap().values_of(BASE_LIN).unwrap();
        for col in 0..x.len() {
            let eval = |h: f64| {
                let mut y = x.clone();
                y[col] += h;
                write_variables(&vars)
                    .unwrap()
                    .set_values_of(BASE_LIN, y.as_slice())
                    .unwrap();
                cost.cost().unwrap()
            };
            let numeric = (eval(FD_STEP) - eval(-FD_STEP)) / (2.0 * FD_STEP);
            assert_relative_eq!(analytic[col], numeric, epsilon = 1e-4, max_relative = 1e-5);
        }

        let other = cost.gradient_block(&ee_force(0)).unwrap();
        assert!(other.iter().all(|g| *g == 0.0));
    }

    #[test]
    fn test_general_form_gradient_matches_finite_differences() {
        let vars = formulation(Vector3::new(0.6, 0.2, 0.4));
        let n = read_variables(&vars).unwrap().set_len(BASE_LIN).unwrap();
        // deterministic scatter, far from symmetric
        let matrix = DMatrix::from_fn(n, n, |i, j| {
            ((3 * i + 7 * j) as f64 * 0.917).sin() + 0.1 * j as f64
        });
        let vector = DVector::from_fn(n, |i, _| (i as f64 * 1.31).cos());
        assert!((&matrix - matrix.transpose()).norm() > 1.0);
        let form = QuadraticForm::new(matrix, vector).unwrap();
        let cost = QuadraticPolynomialCost::new(vars.clone(), BASE_LIN, form, 1.3).unwrap();

        let analytic = cost.gradient_block(BASE_LIN).unwrap();
        let x = read_variables(&vars).unwrap().values_of(BASE_LIN).unwrap();
        for col in 0..n {
            let eval = |h: f64| {
                let mut y = x.clone();
                y[col] += h;
                write_variables(&vars)
                    .unwrap()
                    .set_values_of(BASE_LIN, y.as_slice())
                    .unwrap();
                cost.cost().unwrap()
            };
            let numeric = (eval(FD_STEP) - eval(-FD_STEP)) / (2.0 * FD_STEP);
            assert_relative_eq!(analytic[col], numeric, epsilon = 1e-4, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_diagonal_form_only_touches_values() {
        let vars = formulation(Vector3::new(0.0, 0.0, 0.5));
        let guard = read_variables(&vars).unwrap();
        let force = guard.nodes(&ee_force(0)).unwrap();
        let form = QuadraticForm::diagonal_on_values(force, [0.0, 0.0, 1.0]).unwrap();
        // six stance nodes carry a normal force value each
        assert_eq!(form.matrix.trace(), 6.0);
        assert!(QuadraticForm::diagonal_on_values(force, [-1.0, 0.0, 0.0]).is_err());
    }
}
