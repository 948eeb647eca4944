//! Diagnostics for validating and monitoring training

pub mod gradient_check;
pub mod numerical_check;

pub use gradient_check::{max_relative_error, numerical_gradient, relative_error};
pub use numerical_check::{check_parameters, NumericalIssue};
