//! The concrete state: a finite map from variable names to integers.
//!
//! States are value types with copy-on-write discipline: every
//! evaluation step takes a state and hands back a fresh one, so the
//! fixpoint equality checks never see aliasing.

use std::collections::BTreeMap as Map;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::commons::EvalError;

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConcreteState {
    values: Map<String, i64>,
}

impl ConcreteState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sanctioned create path, used only when building the initial
    /// state.  Assignments during evaluation go through `update`.
    pub fn declare(&mut self, name: &str, value: i64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Result<i64, EvalError> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| EvalError::UnknownVariable(name.to_string()))
    }

    /// Overwrite an existing variable.  Writing a name that was never
    /// declared is a fatal state-update error.
    pub fn update(&mut self, name: &str, value: i64) -> Result<(), EvalError> {
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(EvalError::UndeclaredAssignment(name.to_string())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &i64)> {
        self.values.iter()
    }
}

impl FromIterator<(String, i64)> for ConcreteState {
    fn from_iter<T: IntoIterator<Item = (String, i64)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for ConcreteState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.values.is_empty() {
            return write!(f, "{{ }}");
        }
        let body = self
            .values
            .iter()
            .map(|(name, v)| format!("{name} : {v}"))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{{ {body} }}")
    }
}
