use approx::assert_abs_diff_eq;
use ndarray::Array3;

use carlearn::cars::{CarProbs, State};
use carlearn::config::RentalConfig;
use carlearn::model::TransitionModel;
use carlearn::policy::{PolicyTable, ValueTable};
use carlearn::solver::{
    evaluate_policy, greedy_action, improve_policy, iterate_policy, EvaluationOptions,
    SolverOptions,
};


fn eval_options(gamma: f64, theta: f64) -> EvaluationOptions {
    EvaluationOptions { gamma, theta, ..EvaluationOptions::default() }
}


/// A: action 0 stays in A for reward 1, action 1 moves to B for nothing.
/// B absorbs under both actions.
fn absorbing_tensor() -> TransitionModel {
    let mut probs = Array3::<f64>::zeros((2, 2, 2));
    let mut rewards = Array3::<f64>::zeros((2, 2, 2));
    probs[[0, 0, 0]] = 1.0;
    rewards[[0, 0, 0]] = 1.0;
    probs[[0, 1, 1]] = 1.0;
    probs[[1, 0, 1]] = 1.0;
    probs[[1, 1, 1]] = 1.0;
    TransitionModel::from_tensor(&probs, &rewards, vec![0, 1]).unwrap()
}


fn medium_rental() -> (CarProbs, TransitionModel) {
    let config = RentalConfig { max1: 10, max2: 10, max_move: 3, ..RentalConfig::default() };
    let cprobs = CarProbs::new(&config).unwrap();
    let model = cprobs.build_model().unwrap();
    (cprobs, model)
}


#[test]
fn two_state_scenario_converges_to_known_values() {
    // Arrange
    let model = absorbing_tensor();
    let policy = PolicyTable::new(2, 0);
    let mut values = ValueTable::new(2);
    // Act
    evaluate_policy(&model, &policy, &mut values, &eval_options(0.9, 1e-3), |_, _, _| {})
        .unwrap();
    // Assert
    assert_abs_diff_eq!(values.get(0), 10.0, epsilon = 1e-2);
    assert_abs_diff_eq!(values.get(1), 0.0, epsilon = 1e-3);
}


#[test]
fn rental_model_conserves_probability() {
    let (_, model) = medium_rental();
    assert_eq!(model.validate(1e-6), Ok(()));
}


#[test]
fn improvement_never_lowers_values() {
    // Arrange
    let (_, model) = medium_rental();
    let options = eval_options(0.9, 1e-8);
    let mut policy = PolicyTable::new(model.num_states(), 0);
    let mut old_values = ValueTable::new(model.num_states());
    evaluate_policy(&model, &policy, &mut old_values, &options, |_, _, _| {}).unwrap();
    // Act
    let changed = improve_policy(&model, &old_values, &mut policy, options.gamma).unwrap();
    let mut new_values = ValueTable::new(model.num_states());
    evaluate_policy(&model, &policy, &mut new_values, &options, |_, _, _| {}).unwrap();
    // Assert
    assert!(changed);
    for s in model.states() {
        assert!(new_values.get(s) >= old_values.get(s) - 1e-6,
                "state {} regressed: {} < {}", s, new_values.get(s), old_values.get(s));
    }
}


#[test]
fn policy_iteration_is_greedy_consistent() {
    // Arrange
    let (_, model) = medium_rental();
    let theta = 1e-6;
    let options = SolverOptions { evaluation: eval_options(0.9, theta), max_iterations: 50 };
    // Act
    let result = iterate_policy(&model, &options, 0, |_, _, _| {}).unwrap();
    // Assert
    assert!(result.iterations >= 2);
    for s in model.states() {
        let (best, best_q) = greedy_action(&model, s, &result.values, 0.9).unwrap();
        assert_eq!(best, result.policy.get(s));
        // Bellman optimality up to the evaluation tolerance.
        assert!((result.values.get(s) - best_q).abs() < 10.0 * theta);
    }
}


#[test]
fn policy_iteration_is_reproducible() {
    let (_, model) = medium_rental();
    let options = SolverOptions::default();
    let first = iterate_policy(&model, &options, 0, |_, _, _| {}).unwrap();
    let second = iterate_policy(&model, &options, 0, |_, _, _| {}).unwrap();
    assert_eq!(first.policy, second.policy);
    assert_eq!(first.iterations, second.iterations);
}


#[test]
fn classic_problem_moves_cars_toward_busy_lot() {
    // Arrange
    let config = RentalConfig::default();
    let cprobs = CarProbs::new(&config).unwrap();
    let model = cprobs.build_model().unwrap();
    // Act
    let result = iterate_policy(&model, &SolverOptions::default(), 0, |_, _, _| {}).unwrap();
    // Assert
    let full_first = State { n1: 20, n2: 0 }.index(cprobs.max2);
    let empty = State { n1: 0, n2: 0 }.index(cprobs.max2);
    assert!(result.policy.get(full_first) >= 4);
    assert_eq!(result.policy.get(empty), 0);
    for s in model.states() {
        assert!(model.is_legal(s, result.policy.get(s)));
    }
}
