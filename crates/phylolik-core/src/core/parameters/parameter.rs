use super::ParameterError;
use super::constraint::Constraint;

/// A named, constrained scalar.
///
/// The value of a parameter always satisfies its constraint: every mutation
/// goes through [`Parameter::set_value`], which rejects infeasible values.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    value: f64,
    constraint: Constraint,
}

impl Parameter {
    /// Creates a parameter, validating the initial value.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::ConstraintViolation`] if `value` is outside the domain.
    pub fn new(
        name: impl Into<String>,
        value: f64,
        constraint: Constraint,
    ) -> Result<Self, ParameterError> {
        let name = name.into();
        if !constraint.is_satisfied(value) {
            return Err(ParameterError::ConstraintViolation {
                name,
                value,
                constraint,
            });
        }
        Ok(Self {
            name,
            value,
            constraint,
        })
    }

    /// Creates a parameter without any domain restriction.
    pub fn unconstrained(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            constraint: Constraint::Unbounded,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn constraint(&self) -> Constraint {
        self.constraint
    }

    /// Updates the value.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::ConstraintViolation`] and leaves the value
    /// untouched if `value` is infeasible.
    pub fn set_value(&mut self, value: f64) -> Result<(), ParameterError> {
        if !self.constraint.is_satisfied(value) {
            return Err(ParameterError::ConstraintViolation {
                name: self.name.clone(),
                value,
                constraint: self.constraint,
            });
        }
        self.value = value;
        Ok(())
    }

    /// Returns a copy of this parameter under another name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: self.value,
            constraint: self.constraint,
        }
    }

    /// Returns a copy of this parameter with a different constraint.
    ///
    /// Used by wrappers that expose a transformed view of a parameter.
    pub(crate) fn with_constraint(&self, constraint: Constraint, value: f64) -> Self {
        Self {
            name: self.name.clone(),
            value,
            constraint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_values_outside_the_constraint() {
        let result = Parameter::new("kappa", -1.0, Constraint::POSITIVE);
        assert!(matches!(
            result,
            Err(ParameterError::ConstraintViolation { .. })
        ));
    }

    #[test]
    fn set_value_keeps_previous_value_on_violation() {
        let mut p = Parameter::new("theta", 0.4, Constraint::PROPORTION).unwrap();
        assert!(p.set_value(1.5).is_err());
        assert_eq!(p.value(), 0.4);
        p.set_value(0.6).unwrap();
        assert_eq!(p.value(), 0.6);
    }

    #[test]
    fn renamed_keeps_value_and_constraint() {
        let p = Parameter::new("kappa", 3.0, Constraint::POSITIVE).unwrap();
        let q = p.renamed("kappa_2");
        assert_eq!(q.name(), "kappa_2");
        assert_eq!(q.value(), 3.0);
        assert_eq!(q.constraint(), Constraint::POSITIVE);
    }
}
