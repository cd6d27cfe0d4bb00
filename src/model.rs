use std::ops::Range;

use approx::abs_diff_eq;
use ndarray::{s, Array3};

use crate::error::{Error, Result};
use crate::policy::ValueTable;

/// One possible outcome of taking an action in a state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub next_state: usize,
    pub probability: f64,
    /// Expected immediate reward given this next state.
    pub reward: f64,
}

/// Dynamics of a finite MDP.
///
/// States are flat indices `0..num_states`. Actions are signed integers kept
/// in ascending order; an action's position in that list is its action index
/// and defines the enumeration order used for tie-breaking. Every
/// (state, action) pair is either illegal or carries the list of outcomes
/// with non-zero probability.
#[derive(Debug, Clone)]
pub struct TransitionModel {
    num_states: usize,
    actions: Vec<i8>,
    /// Indexed by `state * actions.len() + action_index`. `None` is illegal.
    table: Vec<Option<Vec<Transition>>>,
}

impl TransitionModel {
    /// Empty model in which no action is legal yet.
    pub fn new(num_states: usize, actions: Vec<i8>) -> Result<TransitionModel> {
        if num_states == 0 {
            return Err(Error::InvalidConfig("model needs at least one state".into()));
        }
        if actions.is_empty() {
            return Err(Error::InvalidConfig("model needs at least one action".into()));
        }
        if actions.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidConfig(
                "actions must be strictly ascending".into(),
            ));
        }
        let table = vec![None; num_states * actions.len()];
        Ok(TransitionModel { num_states, actions, table })
    }

    /// Build a model from dense tensors indexed `[state, action index, next state]`.
    ///
    /// A (state, action) row whose probabilities are all zero is illegal.
    pub fn from_tensor(
        probs: &Array3<f64>, rewards: &Array3<f64>, actions: Vec<i8>,
    ) -> Result<TransitionModel> {
        let (n_s, n_a, n_next) = probs.dim();
        if rewards.dim() != probs.dim() {
            return Err(Error::ShapeMismatch(format!(
                "probability tensor {:?} vs reward tensor {:?}",
                probs.dim(), rewards.dim()
            )));
        }
        if n_s != n_next || n_a != actions.len() {
            return Err(Error::ShapeMismatch(format!(
                "tensor {:?} does not match {} actions", probs.dim(), actions.len()
            )));
        }
        let mut model = TransitionModel::new(n_s, actions)?;
        for state in 0..n_s {
            for ai in 0..n_a {
                let row = probs.slice(s![state, ai, ..]);
                if row.iter().all(|&p| p == 0.0) {
                    continue;
                }
                let transitions = row.iter()
                    .enumerate()
                    .filter(|(_, p)| **p != 0.0)
                    .map(|(next, &p)| Transition {
                        next_state: next,
                        probability: p,
                        reward: rewards[[state, ai, next]],
                    })
                    .collect();
                let action = model.actions[ai];
                model.set_transitions(state, action, transitions)?;
            }
        }
        Ok(model)
    }

    /// Mark `action` legal in `state` with the given outcomes.
    pub fn set_transitions(
        &mut self, state: usize, action: i8, transitions: Vec<Transition>,
    ) -> Result<()> {
        let slot = self.slot(state, action)?;
        for t in &transitions {
            if t.next_state >= self.num_states {
                return Err(Error::InvalidTransition {
                    state, action,
                    reason: format!("next state {} out of range", t.next_state),
                });
            }
            if !t.probability.is_finite() || t.probability < 0.0 {
                return Err(Error::InvalidTransition {
                    state, action,
                    reason: format!("probability {} is not in [0, 1]", t.probability),
                });
            }
            if !t.reward.is_finite() {
                return Err(Error::InvalidTransition {
                    state, action,
                    reason: format!("reward {} is not finite", t.reward),
                });
            }
        }
        self.table[slot] = Some(transitions);
        Ok(())
    }

    pub fn num_states(&self) -> usize {
        self.num_states
    }

    pub fn num_actions(&self) -> usize {
        self.actions.len()
    }

    pub fn states(&self) -> Range<usize> {
        0..self.num_states
    }

    pub fn actions(&self) -> &[i8] {
        &self.actions
    }

    pub fn action_index(&self, action: i8) -> Result<usize> {
        self.actions.binary_search(&action)
            .map_err(|_| Error::UnknownAction(action))
    }

    fn slot(&self, state: usize, action: i8) -> Result<usize> {
        if state >= self.num_states {
            return Err(Error::StateOutOfRange { state, count: self.num_states });
        }
        Ok(state * self.actions.len() + self.action_index(action)?)
    }

    pub fn is_legal(&self, state: usize, action: i8) -> bool {
        self.slot(state, action)
            .map(|slot| self.table[slot].is_some())
            .unwrap_or(false)
    }

    /// Legal actions of `state` in ascending order.
    pub fn legal_actions(&self, state: usize) -> impl Iterator<Item = i8> + '_ {
        self.actions.iter()
            .copied()
            .filter(move |&a| self.is_legal(state, a))
    }

    /// Outcomes of taking `action` in `state`. Illegal actions are rejected.
    pub fn transitions(&self, state: usize, action: i8) -> Result<&[Transition]> {
        let slot = self.slot(state, action)?;
        self.table[slot].as_deref()
            .ok_or(Error::InvalidAction { state, action })
    }

    /// Check that every legal (state, action) pair conserves probability.
    pub fn validate(&self, tolerance: f64) -> Result<()> {
        for state in self.states() {
            for &action in &self.actions {
                let Ok(transitions) = self.transitions(state, action) else {
                    continue;
                };
                let total: f64 = transitions.iter().map(|t| t.probability).sum();
                if !abs_diff_eq!(total, 1.0, epsilon = tolerance) {
                    return Err(Error::ProbabilityMass { state, action, total });
                }
            }
        }
        Ok(())
    }

    /// Expected one-step lookahead return of `action` in `state`.
    pub fn q_value(
        &self, state: usize, action: i8, values: &ValueTable, gamma: f64,
    ) -> Result<f64> {
        if values.len() != self.num_states {
            return Err(Error::ShapeMismatch(format!(
                "model has {} states, value table {}", self.num_states, values.len())));
        }
        let q = self.transitions(state, action)?
            .iter()
            .filter(|t| t.probability > 0.0)
            .map(|t| t.probability * (t.reward + gamma * values.get(t.next_state)))
            .sum();
        Ok(q)
    }
}
