use std::fmt;

use log::{debug, info, warn};

use crate::error::{check_discount, check_threshold, Error, Result};
use crate::model::TransitionModel;
use crate::policy::{PolicyTable, ValueTable};


/// Settings for one policy evaluation run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationOptions {
    /// Discount rate
    pub gamma: f64,
    /// Stop once no state value changes by this much in a sweep.
    pub theta: f64,
    /// Sweeps allowed before giving up with `Error::NotConverged`.
    pub max_sweeps: usize,
    /// Call the observer after every n-th sweep. 0 disables it.
    pub report_every: usize,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        EvaluationOptions { gamma: 0.9, theta: 1e-4, max_sweeps: 10_000, report_every: 0 }
    }
}

impl EvaluationOptions {
    pub fn validate(&self) -> Result<()> {
        check_discount(self.gamma)?;
        check_threshold(self.theta)?;
        if self.max_sweeps == 0 {
            return Err(Error::InvalidConfig("max_sweeps must be at least 1".into()));
        }
        Ok(())
    }
}


#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    pub evaluation: EvaluationOptions,
    /// Outer evaluate/improve rounds allowed before `Error::PolicyNotStable`.
    pub max_iterations: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions { evaluation: EvaluationOptions::default(), max_iterations: 100 }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> Result<()> {
        self.evaluation.validate()?;
        if self.max_iterations == 0 {
            return Err(Error::InvalidConfig("max_iterations must be at least 1".into()));
        }
        Ok(())
    }
}


#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationReport {
    pub sweeps: usize,
    /// Largest value change during the final sweep.
    pub max_diff: f64,
}


/// Phases of policy iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Evaluating,
    Improving,
    Converged,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Phase::Evaluating => "evaluating",
            Phase::Improving => "improving",
            Phase::Converged => "converged",
        };
        write!(f, "{}", name)
    }
}


#[derive(Debug, Clone, PartialEq)]
pub struct PolicyIterationResult {
    pub policy: PolicyTable,
    pub values: ValueTable,
    /// Number of improvement steps, including the final one that changed nothing.
    pub iterations: usize,
    /// Evaluation sweeps summed over all iterations.
    pub sweeps: usize,
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationReport {
    pub iterations: usize,
    pub sweeps: usize,
}


fn check_shapes(model: &TransitionModel, policy: &PolicyTable, values: &ValueTable) -> Result<()> {
    if policy.len() != model.num_states() || values.len() != model.num_states() {
        return Err(Error::ShapeMismatch(format!(
            "model has {} states, policy {}, value table {}",
            model.num_states(), policy.len(), values.len())));
    }
    Ok(())
}


/// Compute the value function of `policy`.
///
/// Sweeps the states in index order and overwrites `V(s)` with the
/// one-step lookahead of the policy's action. Updates happen in place, so
/// later states in a sweep already see this sweep's values for earlier ones.
/// Stops when the largest change within a sweep drops below `theta`.
///
/// When `max_sweeps` is reached first, `Error::NotConverged` is returned and
/// `values` keeps the approximation reached so far.
pub fn evaluate_policy<F>(
    model: &TransitionModel,
    policy: &PolicyTable,
    values: &mut ValueTable,
    options: &EvaluationOptions,
    mut observer: F,
) -> Result<EvaluationReport>
where
    F: FnMut(usize, &ValueTable, &PolicyTable),
{
    options.validate()?;
    check_shapes(model, policy, values)?;
    for state in model.states() {
        let action = policy.get(state);
        if !model.is_legal(state, action) {
            return Err(Error::InvalidAction { state, action });
        }
    }

    let mut sweeps = 0;
    loop {
        let mut max_diff: f64 = 0.0;
        for state in model.states() {
            let v = model.q_value(state, policy.get(state), values, options.gamma)?;
            // V(state) still holds its pre-sweep value here.
            max_diff = max_diff.max((v - values.get(state)).abs());
            values.set(state, v);
        }
        sweeps += 1;
        debug!("Evaluation sweep {}: max diff {:.6}", sweeps, max_diff);

        if options.report_every > 0 && sweeps % options.report_every == 0 {
            observer(sweeps, values, policy);
        }
        if max_diff < options.theta {
            return Ok(EvaluationReport { sweeps, max_diff });
        }
        if sweeps >= options.max_sweeps {
            warn!("Policy evaluation stopped after {} sweeps (max diff {:.6})",
                  sweeps, max_diff);
            return Err(Error::NotConverged { sweeps, max_diff });
        }
    }
}


/// Best legal action in `state` and its q-value.
///
/// Ties go to the first maximiser in ascending action order.
pub fn greedy_action(
    model: &TransitionModel, state: usize, values: &ValueTable, gamma: f64,
) -> Result<(i8, f64)> {
    let mut best: Option<(i8, f64)> = None;
    for action in model.legal_actions(state) {
        let q = model.q_value(state, action, values, gamma)?;
        match best {
            Some((_, best_q)) if q <= best_q => {}
            _ => best = Some((action, q)),
        }
    }
    best.ok_or(Error::NoLegalAction(state))
}


/// Make `policy` greedy with respect to `values`.
///
/// Returns true if any state's action changed.
pub fn improve_policy(
    model: &TransitionModel,
    values: &ValueTable,
    policy: &mut PolicyTable,
    gamma: f64,
) -> Result<bool> {
    check_discount(gamma)?;
    check_shapes(model, policy, values)?;
    let mut changed = 0;
    for state in model.states() {
        let (action, _) = greedy_action(model, state, values, gamma)?;
        if action != policy.get(state) {
            policy.set(state, action);
            changed += 1;
        }
    }
    debug!("Policy improvement changed {} states", changed);
    Ok(changed > 0)
}


/// Alternate evaluation and improvement until the policy is stable.
///
/// Starts from the policy that takes `default_action` everywhere, so that
/// action must be legal in every state. The observer is handed to every
/// evaluation run. Use `iterate_policy_in_place` to keep the tables when the
/// run ends in `NotConverged` or `PolicyNotStable`.
pub fn iterate_policy<F>(
    model: &TransitionModel,
    options: &SolverOptions,
    default_action: i8,
    observer: F,
) -> Result<PolicyIterationResult>
where
    F: FnMut(usize, &ValueTable, &PolicyTable),
{
    let mut policy = PolicyTable::new(model.num_states(), default_action);
    let mut values = ValueTable::new(model.num_states());
    let report = iterate_policy_in_place(model, options, &mut policy, &mut values, observer)?;
    Ok(PolicyIterationResult {
        policy,
        values,
        iterations: report.iterations,
        sweeps: report.sweeps,
    })
}


/// Policy iteration over caller-owned tables.
///
/// On error `policy` and `values` hold the last policy and its (possibly
/// partial) evaluation.
pub fn iterate_policy_in_place<F>(
    model: &TransitionModel,
    options: &SolverOptions,
    policy: &mut PolicyTable,
    values: &mut ValueTable,
    mut observer: F,
) -> Result<IterationReport>
where
    F: FnMut(usize, &ValueTable, &PolicyTable),
{
    options.validate()?;
    check_shapes(model, policy, values)?;
    let mut iterations = 0;
    let mut sweeps = 0;
    let mut phase = Phase::Evaluating;

    loop {
        match phase {
            Phase::Evaluating => {
                let report = evaluate_policy(
                    model, policy, values, &options.evaluation, &mut observer)?;
                sweeps += report.sweeps;
                phase = Phase::Improving;
            }
            Phase::Improving => {
                iterations += 1;
                let changed = improve_policy(
                    model, values, policy, options.evaluation.gamma)?;
                if changed && iterations >= options.max_iterations {
                    warn!("Policy still changing after {} iterations", iterations);
                    return Err(Error::PolicyNotStable { iterations });
                }
                phase = if changed { Phase::Evaluating } else { Phase::Converged };
                info!("Policy iteration {}: {} sweeps so far, now {}",
                      iterations, sweeps, phase);
            }
            Phase::Converged => {
                return Ok(IterationReport { iterations, sweeps });
            }
        }
    }
}
