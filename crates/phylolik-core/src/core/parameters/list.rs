use super::ParameterError;
use super::parameter::Parameter;
use std::fmt;
use std::ops::Index;

/// An ordered collection of parameters with unique names.
///
/// Lists never alias each other: two components that need the same value
/// hold their own copies and synchronize through [`ParameterList::match_values`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterList {
    parameters: Vec<Parameter>,
}

impl ParameterList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a list from parameters, rejecting duplicated names.
    pub fn from_parameters(
        parameters: impl IntoIterator<Item = Parameter>,
    ) -> Result<Self, ParameterError> {
        let mut list = Self::new();
        for p in parameters {
            list.add(p)?;
        }
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter()
    }

    /// Position of the parameter called `name`, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Looks a parameter up by name, treating absence as an expected outcome.
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name() == name)
    }

    /// Looks a parameter up by name.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::NotFound`] carrying the requested name.
    pub fn parameter(&self, name: &str) -> Result<&Parameter, ParameterError> {
        self.get(name).ok_or_else(|| ParameterError::NotFound {
            name: name.to_string(),
        })
    }

    /// Value of the parameter called `name`.
    pub fn value(&self, name: &str) -> Result<f64, ParameterError> {
        self.parameter(name).map(Parameter::value)
    }

    /// Parameter at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::IndexOutOfRange`] carrying the index and list length.
    pub fn at(&self, index: usize) -> Result<&Parameter, ParameterError> {
        self.parameters
            .get(index)
            .ok_or(ParameterError::IndexOutOfRange {
                index,
                len: self.parameters.len(),
            })
    }

    /// Appends a parameter.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::Duplicate`] if a parameter with the same name exists.
    pub fn add(&mut self, parameter: Parameter) -> Result<(), ParameterError> {
        if self.contains(parameter.name()) {
            return Err(ParameterError::Duplicate {
                name: parameter.name().to_string(),
            });
        }
        self.parameters.push(parameter);
        Ok(())
    }

    /// Appends every parameter of `other`; fails without modification on the first duplicate.
    pub fn add_all(&mut self, other: &ParameterList) -> Result<(), ParameterError> {
        if let Some(dup) = other.iter().find(|p| self.contains(p.name())) {
            return Err(ParameterError::Duplicate {
                name: dup.name().to_string(),
            });
        }
        self.parameters.extend(other.parameters.iter().cloned());
        Ok(())
    }

    /// Removes and returns the parameter called `name`.
    pub fn remove(&mut self, name: &str) -> Result<Parameter, ParameterError> {
        let index = self.index_of(name).ok_or_else(|| ParameterError::NotFound {
            name: name.to_string(),
        })?;
        Ok(self.parameters.remove(index))
    }

    /// Removes every parameter whose name is in `names`; absent names are skipped.
    pub fn remove_all<S: AsRef<str>>(&mut self, names: &[S]) {
        self.parameters
            .retain(|p| !names.iter().any(|n| n.as_ref() == p.name()));
    }

    pub fn names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.parameters.iter().map(Parameter::value).collect()
    }

    /// Extracts the parameters called `names`, in the order given.
    ///
    /// # Errors
    ///
    /// Returns [`ParameterError::NotFound`] for the first missing name.
    pub fn sublist<S: AsRef<str>>(&self, names: &[S]) -> Result<ParameterList, ParameterError> {
        let mut sub = ParameterList::new();
        for name in names {
            sub.add(self.parameter(name.as_ref())?.clone())?;
        }
        Ok(sub)
    }

    /// Parameters of `self` whose names also appear in `other`, with the values of `self`.
    pub fn common_with(&self, other: &ParameterList) -> ParameterList {
        ParameterList {
            parameters: self
                .parameters
                .iter()
                .filter(|p| other.contains(p.name()))
                .cloned()
                .collect(),
        }
    }

    /// Sets the value of the parameter called `name`.
    pub fn set_value(&mut self, name: &str, value: f64) -> Result<(), ParameterError> {
        let index = self.index_of(name).ok_or_else(|| ParameterError::NotFound {
            name: name.to_string(),
        })?;
        self.parameters[index].set_value(value)
    }

    /// Sets the value of the parameter at `index`.
    pub fn set_value_at(&mut self, index: usize, value: f64) -> Result<(), ParameterError> {
        let len = self.parameters.len();
        self.parameters
            .get_mut(index)
            .ok_or(ParameterError::IndexOutOfRange { index, len })?
            .set_value(value)
    }

    /// Copies the values of `other` into `self`; every name of `other` must exist in `self`.
    ///
    /// Returns the names whose value actually changed. On error, `self` is unchanged.
    pub fn set_values(&mut self, other: &ParameterList) -> Result<Vec<String>, ParameterError> {
        for p in other.iter() {
            self.parameter(p.name())?;
        }
        self.match_values(other)
    }

    /// Copies the values of parameters present in both lists from `other` into `self`.
    ///
    /// Names of `other` unknown to `self` are ignored. Returns the names whose value
    /// actually changed. On a constraint violation `self` is left unchanged.
    pub fn match_values(&mut self, other: &ParameterList) -> Result<Vec<String>, ParameterError> {
        let mut staged = self.parameters.clone();
        let mut changed = Vec::new();
        for p in other.iter() {
            if let Some(target) = staged.iter_mut().find(|q| q.name() == p.name()) {
                if target.value() != p.value() {
                    target.set_value(p.value())?;
                    changed.push(p.name().to_string());
                }
            }
        }
        self.parameters = staged;
        Ok(changed)
    }

    /// Returns a copy of this list with positional values replaced by `values`.
    pub fn with_values(&self, values: &[f64]) -> Result<ParameterList, ParameterError> {
        if values.len() != self.parameters.len() {
            return Err(ParameterError::IndexOutOfRange {
                index: values.len(),
                len: self.parameters.len(),
            });
        }
        let mut copy = self.clone();
        for (p, &v) in copy.parameters.iter_mut().zip(values) {
            p.set_value(v)?;
        }
        Ok(copy)
    }

    /// Returns a copy with every value projected onto its constraint.
    pub fn clamped(&self) -> ParameterList {
        let mut copy = self.clone();
        for p in copy.parameters.iter_mut() {
            let v = p.constraint().closest_feasible(p.value());
            if p.constraint().is_satisfied(v) {
                // Feasible by construction; a NaN is left for the caller to detect.
                let _ = p.set_value(v);
            }
        }
        copy
    }
}

impl Index<usize> for ParameterList {
    type Output = Parameter;

    fn index(&self, index: usize) -> &Self::Output {
        &self.parameters[index]
    }
}

impl<'a> IntoIterator for &'a ParameterList {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.parameters.iter()
    }
}

impl fmt::Display for ParameterList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in &self.parameters {
            writeln!(f, "{}={}", p.name(), p.value())?;
        }
        Ok(())
    }
}
