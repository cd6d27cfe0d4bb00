use ndarray::{Array1, Array2};

use crate::error::{Error, Result};


/// State-value estimates, one per state. Starts at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueTable {
    values: Array1<f64>,
}

impl ValueTable {
    pub fn new(num_states: usize) -> ValueTable {
        ValueTable { values: Array1::<f64>::zeros(num_states) }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, state: usize) -> f64 {
        self.values[state]
    }

    pub fn set(&mut self, state: usize, value: f64) {
        self.values[state] = value;
    }

    pub fn as_array(&self) -> &Array1<f64> {
        &self.values
    }

    /// Reshape into a `rows x cols` grid (row-major state order).
    pub fn to_grid(&self, rows: usize, cols: usize) -> Result<Array2<f64>> {
        reshape(&self.values, rows, cols)
    }
}


/// Chosen action per state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyTable {
    actions: Array1<i8>,
}

impl PolicyTable {
    /// Every state starts with `default_action`.
    pub fn new(num_states: usize, default_action: i8) -> PolicyTable {
        PolicyTable { actions: Array1::from_elem(num_states, default_action) }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn get(&self, state: usize) -> i8 {
        self.actions[state]
    }

    pub fn set(&mut self, state: usize, action: i8) {
        self.actions[state] = action;
    }

    pub fn as_array(&self) -> &Array1<i8> {
        &self.actions
    }

    pub fn to_grid(&self, rows: usize, cols: usize) -> Result<Array2<i8>> {
        reshape(&self.actions, rows, cols)
    }
}


fn reshape<T: Clone>(values: &Array1<T>, rows: usize, cols: usize) -> Result<Array2<T>> {
    values.clone()
        .into_shape_with_order((rows, cols))
        .map_err(|_| Error::ShapeMismatch(format!(
            "cannot view {} states as a {}x{} grid", values.len(), rows, cols)))
}
