//! Cost and constraint assembly for legged-robot trajectory optimization.
//!
//! The crate turns a motion horizon, a terrain, a dynamics model and boundary
//! states into NLP components (values, bounds, exact Jacobians) that read
//! from one shared [`variables::VariableContainer`]:
//!
//! - [`variables`]: spline-backed node values, contact schedules and the
//!   Euler-angle converter
//! - [`models`]: the pluggable [`models::DynamicModel`] contract and a
//!   centroidal reference model
//! - [`constraints`]: the time-discretization scheme, the dynamic constraint
//!   and the boundary/kinematic/terrain constraints
//! - [`costs`]: quadratic spline costs and soft constraints
//! - [`factory`]: named construction of every component
//! - [`problem`]: stacking into one sparse NLP

pub mod constraints;
pub mod costs;
pub mod error;
pub mod factory;
pub mod logger;
pub mod models;
pub mod parameters;
pub mod problem;
pub mod snapshot;
pub mod terrain;
pub mod variables;

pub use legged_splines::{CurveState, Dx, Node};

pub use error::{NlpError, NlpResult};
pub use factory::{ConstraintName, CostConstraintFactory, CostName};
pub use logger::{init_logger, init_logger_with_level};
pub use parameters::MotionParameters;
pub use problem::Problem;
pub use variables::{BaseState, Bounds, SharedVariables, VariableContainer};
