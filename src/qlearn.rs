use log::debug;
use ndarray::{Array1, Array2};
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use statrs::distribution::Normal;

use crate::error::{check_discount, Error, Result};


/// Weight of the newest episode in the running return average.
const RETURN_SMOOTHING: f64 = 0.01;


#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LearnerOptions {
    /// Base learning rate. The rate used in episode e is alpha0^(e / decay).
    pub alpha0: f64,
    /// Episodes over which the learning rate decays by a factor of alpha0.
    pub decay: f64,
    /// Discount rate
    pub gamma: f64,
    /// Seed for the exploration noise.
    pub seed: u64,
}

impl Default for LearnerOptions {
    fn default() -> Self {
        LearnerOptions { alpha0: 0.5, decay: 2000.0, gamma: 0.95, seed: 0 }
    }
}

impl LearnerOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha0 > 0.0 && self.alpha0 <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "alpha0 must be in (0, 1] (got {})", self.alpha0)));
        }
        if !(self.decay.is_finite() && self.decay > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "decay must be positive (got {})", self.decay)));
        }
        check_discount(self.gamma)
    }
}


/// One sampled step of an environment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Experience {
    pub state: usize,
    pub action: usize,
    pub reward: f64,
    pub next_state: usize,
    pub terminal: bool,
}


/// Tabular Q-Learning with noise-perturbed action scores.
///
/// Exploration adds N(0, 1) / e to every action value, where e is the
/// current episode number, so exploration fades as episodes go by.
pub struct QLearner {
    q: Array2<f64>,
    episode: u64,
    options: LearnerOptions,
    rng: StdRng,
    noise: Normal,
    episode_return: f64,
    average_return: f64,
}

impl QLearner {
    pub fn new(num_states: usize, num_actions: usize, options: LearnerOptions) -> Result<QLearner> {
        options.validate()?;
        if num_states == 0 || num_actions == 0 {
            return Err(Error::InvalidConfig(
                "learner needs at least one state and one action".into()));
        }
        let noise = Normal::new(0.0, 1.0)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        Ok(QLearner {
            q: Array2::<f64>::zeros((num_states, num_actions)),
            episode: 1,
            options,
            rng: StdRng::seed_from_u64(options.seed),
            noise,
            episode_return: 0.0,
            average_return: 0.0,
        })
    }

    pub fn q_table(&self) -> &Array2<f64> {
        &self.q
    }

    /// Current episode number, starting at 1.
    pub fn episode(&self) -> u64 {
        self.episode
    }

    /// Exponential moving average of episode returns.
    pub fn average_return(&self) -> f64 {
        self.average_return
    }

    pub fn learning_rate(&self) -> f64 {
        self.options.alpha0.powf(self.episode as f64 / self.options.decay)
    }

    fn check_state(&self, state: usize) -> Result<()> {
        let count = self.q.nrows();
        if state >= count {
            return Err(Error::StateOutOfRange { state, count });
        }
        Ok(())
    }

    fn check_action(&self, index: usize) -> Result<()> {
        let count = self.q.ncols();
        if index >= count {
            return Err(Error::ActionIndexOutOfRange { index, count });
        }
        Ok(())
    }

    /// Noisy action scores for `state`. The caller acts on their argmax.
    pub fn select_action(&mut self, state: usize) -> Result<Array1<f64>> {
        self.check_state(state)?;
        let scale = 1.0 / self.episode as f64;
        let mut scores = self.q.row(state).to_owned();
        for score in scores.iter_mut() {
            *score += self.noise.sample(&mut self.rng) * scale;
        }
        Ok(scores)
    }

    /// Index of the first maximum.
    pub fn greedy(scores: &Array1<f64>) -> usize {
        let mut best = 0;
        for (i, &score) in scores.iter().enumerate() {
            if score > scores[best] {
                best = i;
            }
        }
        best
    }

    fn max_value(&self, state: usize) -> f64 {
        self.q.row(state).fold(f64::NEG_INFINITY, |m, &v| m.max(v))
    }

    /// One-step Q-Learning update. A terminal step closes the episode.
    pub fn observe(&mut self, exp: &Experience) -> Result<()> {
        self.check_state(exp.state)?;
        self.check_state(exp.next_state)?;
        self.check_action(exp.action)?;

        let alpha = self.learning_rate();
        let target = if exp.terminal {
            exp.reward
        } else {
            exp.reward + self.options.gamma * self.max_value(exp.next_state)
        };
        let q = &mut self.q[[exp.state, exp.action]];
        *q += alpha * (target - *q);

        self.episode_return += exp.reward;
        if exp.terminal {
            self.end_episode();
        }
        Ok(())
    }

    /// Close the current episode without a terminal step, e.g. when a step
    /// limit cut it short.
    pub fn end_episode(&mut self) {
        self.average_return = (1.0 - RETURN_SMOOTHING) * self.average_return
            + RETURN_SMOOTHING * self.episode_return;
        debug!("Episode {} return {:.3}, running average {:.4}",
               self.episode, self.episode_return, self.average_return);
        self.episode_return = 0.0;
        self.episode += 1;
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use test_case::test_case;

    fn learner(alpha0: f64) -> QLearner {
        let options = LearnerOptions { alpha0, decay: 10.0, gamma: 0.9, seed: 3 };
        QLearner::new(3, 2, options).unwrap()
    }

    #[test]
    fn starts_at_zero() {
        let ql = learner(0.5);
        assert_eq!(ql.q_table().dim(), (3, 2));
        assert!(ql.q_table().iter().all(|&v| v == 0.0));
        assert_eq!(ql.episode(), 1);
        assert_eq!(ql.average_return(), 0.0);
    }

    #[test_case(0.0; "Zero")]
    #[test_case(1.5; "Above one")]
    #[test_case(f64::NAN; "Not a number")]
    fn rejects_bad_alpha(alpha0: f64) {
        let options = LearnerOptions { alpha0, ..LearnerOptions::default() };
        assert!(matches!(QLearner::new(3, 2, options), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn rejects_bad_discount() {
        let options = LearnerOptions { gamma: 1.0, ..LearnerOptions::default() };
        assert!(matches!(QLearner::new(3, 2, options), Err(Error::InvalidDiscount(_))));
    }

    #[test]
    fn learning_rate_decays_with_episodes() {
        // Arrange
        let mut ql = learner(0.5);
        let first = ql.learning_rate();
        // Act
        for _ in 0..10 {
            ql.end_episode();
        }
        // Assert
        assert_abs_diff_eq!(first, 0.5f64.powf(0.1), epsilon = 1e-12);
        assert_abs_diff_eq!(ql.learning_rate(), 0.5f64.powf(1.1), epsilon = 1e-12);
        assert_eq!(ql.episode(), 11);
    }

    #[test]
    fn terminal_update_uses_reward_only() {
        // Arrange
        let mut ql = learner(0.5);
        let alpha = ql.learning_rate();
        // Act
        ql.observe(&Experience {
            state: 0, action: 1, reward: 2.0, next_state: 2, terminal: true,
        }).unwrap();
        // Assert
        assert_abs_diff_eq!(ql.q_table()[[0, 1]], alpha * 2.0, epsilon = 1e-12);
        assert_eq!(ql.episode(), 2);
        assert_abs_diff_eq!(ql.average_return(), 0.02, epsilon = 1e-12);
    }

    #[test]
    fn bootstrap_update_uses_best_successor() {
        // Arrange
        let mut ql = learner(1.0);
        ql.observe(&Experience {
            state: 2, action: 0, reward: 1.0, next_state: 0, terminal: true,
        }).unwrap();
        ql.observe(&Experience {
            state: 2, action: 1, reward: 3.0, next_state: 0, terminal: true,
        }).unwrap();
        // Act
        ql.observe(&Experience {
            state: 1, action: 0, reward: 0.5, next_state: 2, terminal: false,
        }).unwrap();
        // Assert: alpha0 = 1 replaces the value with the target.
        assert_abs_diff_eq!(ql.q_table()[[1, 0]], 0.5 + 0.9 * 3.0, epsilon = 1e-12);
        assert_eq!(ql.episode(), 3);
    }

    #[test]
    fn noise_shrinks_with_episodes() {
        // Arrange
        let mut ql = learner(0.5);
        let early: f64 = (0..200)
            .map(|_| ql.select_action(0).unwrap().iter().map(|v| v.abs()).sum::<f64>())
            .sum();
        for _ in 0..99 {
            ql.end_episode();
        }
        // Act
        let late: f64 = (0..200)
            .map(|_| ql.select_action(0).unwrap().iter().map(|v| v.abs()).sum::<f64>())
            .sum();
        // Assert
        assert!(late < early / 10.0);
    }

    #[test]
    fn seeded_learners_are_reproducible() {
        let mut a = learner(0.5);
        let mut b = learner(0.5);
        assert_eq!(a.select_action(1).unwrap(), b.select_action(1).unwrap());
    }

    #[test]
    fn greedy_takes_first_maximum() {
        assert_eq!(QLearner::greedy(&array![0.0, 2.0, 2.0, 1.0]), 1);
        assert_eq!(QLearner::greedy(&array![-1.0, -3.0]), 0);
    }

    #[test]
    fn rejects_out_of_range_indices() {
        let mut ql = learner(0.5);
        assert!(matches!(ql.select_action(3), Err(Error::StateOutOfRange { .. })));
        let bad_action = Experience {
            state: 0, action: 2, reward: 0.0, next_state: 0, terminal: false,
        };
        assert_eq!(
            ql.observe(&bad_action),
            Err(Error::ActionIndexOutOfRange { index: 2, count: 2 }));
    }
}
