//! Named, constrained scalar parameters and the ordered lists that hold them.
//!
//! Every stateful component of the library (models, frequency sets, rate
//! distributions, model sets, likelihood functions) exposes its state as a
//! [`ParameterList`] and accepts updates through the same list type. Lists
//! share values only through explicit synchronization
//! ([`ParameterList::match_values`]); nothing is aliased.

mod constraint;
mod list;
mod parameter;

pub use constraint::Constraint;
pub use list::ParameterList;
pub use parameter::Parameter;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Parameter not found: '{name}'")]
    NotFound { name: String },

    #[error("Duplicate parameter name: '{name}'")]
    Duplicate { name: String },

    #[error("Value {value} of parameter '{name}' violates constraint {constraint}")]
    ConstraintViolation {
        name: String,
        value: f64,
        constraint: Constraint,
    },

    #[error("Index {index} is out of range for a list of {len} element(s)")]
    IndexOutOfRange { index: usize, len: usize },
}
