use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the transition model, the solvers and the learner.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("action {action} is not legal in state {state}")]
    InvalidAction { state: usize, action: i8 },

    #[error("action {0} is not part of the model's action set")]
    UnknownAction(i8),

    #[error("action index {index} out of range (model has {count} actions)")]
    ActionIndexOutOfRange { index: usize, count: usize },

    #[error("state {state} out of range (model has {count} states)")]
    StateOutOfRange { state: usize, count: usize },

    #[error("state {0} has no legal action")]
    NoLegalAction(usize),

    #[error("probabilities for state {state}, action {action} sum to {total:.8}")]
    ProbabilityMass { state: usize, action: i8, total: f64 },

    #[error("invalid transition from state {state} under action {action}: {reason}")]
    InvalidTransition {
        state: usize,
        action: i8,
        reason: String,
    },

    #[error("policy evaluation did not converge after {sweeps} sweeps (max diff {max_diff:.6})")]
    NotConverged { sweeps: usize, max_diff: f64 },

    #[error("policy still changing after {iterations} iterations")]
    PolicyNotStable { iterations: usize },

    #[error("discount factor must be in [0, 1) (got {0})")]
    InvalidDiscount(f64),

    #[error("convergence threshold must be positive (got {0})")]
    InvalidThreshold(f64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
}

/// Reject discount factors that break the termination guarantee.
pub fn check_discount(gamma: f64) -> Result<()> {
    if gamma.is_finite() && (0.0..1.0).contains(&gamma) {
        Ok(())
    } else {
        Err(Error::InvalidDiscount(gamma))
    }
}

pub fn check_threshold(theta: f64) -> Result<()> {
    if theta.is_finite() && theta > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidThreshold(theta))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0.0; "No discounting")]
    #[test_case(0.9; "Typical discount")]
    #[test_case(0.999; "Long horizon")]
    fn accepts_valid_discount(gamma: f64) {
        assert_eq!(check_discount(gamma), Ok(()));
    }

    #[test_case(1.0; "Undiscounted")]
    #[test_case(1.5; "Greater than one")]
    #[test_case(-0.1; "Negative")]
    #[test_case(f64::NAN; "Not a number")]
    fn rejects_invalid_discount(gamma: f64) {
        assert!(matches!(check_discount(gamma), Err(Error::InvalidDiscount(_))));
    }

    #[test]
    fn rejects_non_positive_threshold() {
        assert_eq!(check_threshold(0.0), Err(Error::InvalidThreshold(0.0)));
        assert!(check_threshold(-1e-3).is_err());
        assert!(check_threshold(1e-3).is_ok());
    }
}
