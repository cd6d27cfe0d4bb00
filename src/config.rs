use std::path::Path;

use config_file::FromConfigFile;
use serde::Deserialize;

use crate::env::DEFAULT_MAP;
use crate::error::{Error, Result};
use crate::qlearn::LearnerOptions;
use crate::solver::{EvaluationOptions, SolverOptions};


/// Car rental problem parameters.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct RentalConfig {
    pub max1: u8,
    pub rent_mean1: f32,
    pub return_mean1: f32,
    pub max2: u8,
    pub rent_mean2: f32,
    pub return_mean2: f32,
    pub max_move: u8,
    /// Credit earned per car rented
    pub rent_reward: f64,
    /// Cost per car moved overnight
    pub move_cost: f64,
}

impl Default for RentalConfig {
    fn default() -> Self {
        RentalConfig {
            max1: 20, rent_mean1: 3.0, return_mean1: 3.0,
            max2: 20, rent_mean2: 4.0, return_mean2: 2.0,
            max_move: 5,
            rent_reward: 10.0,
            move_cost: 2.0,
        }
    }
}

impl RentalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max1 == 0 || self.max2 == 0 {
            return Err(Error::InvalidConfig("lot capacities must be positive".into()));
        }
        if self.max_move > i8::MAX as u8 || self.max_move > self.max1.min(self.max2) {
            return Err(Error::InvalidConfig(format!(
                "max_move ({}) exceeds the smallest lot capacity", self.max_move)));
        }
        let means = [
            ("rent_mean1", self.rent_mean1), ("return_mean1", self.return_mean1),
            ("rent_mean2", self.rent_mean2), ("return_mean2", self.return_mean2),
        ];
        for (name, mean) in means {
            if !mean.is_finite() || mean <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{} must be positive (got {})", name, mean)));
            }
        }
        if !self.rent_reward.is_finite() || !self.move_cost.is_finite() || self.move_cost < 0.0 {
            return Err(Error::InvalidConfig(
                "rent_reward must be finite and move_cost non-negative".into()));
        }
        Ok(())
    }
}


/// Policy iteration settings.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SolverConfig {
    pub gamma: f64,
    pub theta: f64,
    pub max_sweeps: usize,
    pub max_iterations: usize,
    /// Log the value table every n evaluation sweeps. 0 disables it.
    pub report_every: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        let defaults = SolverOptions::default();
        SolverConfig {
            gamma: defaults.evaluation.gamma,
            theta: defaults.evaluation.theta,
            max_sweeps: defaults.evaluation.max_sweeps,
            max_iterations: defaults.max_iterations,
            report_every: defaults.evaluation.report_every,
        }
    }
}

impl SolverConfig {
    pub fn options(&self) -> SolverOptions {
        SolverOptions {
            evaluation: EvaluationOptions {
                gamma: self.gamma,
                theta: self.theta,
                max_sweeps: self.max_sweeps,
                report_every: self.report_every,
            },
            max_iterations: self.max_iterations,
        }
    }
}


/// Q-Learning settings for the Frozen Lake agent.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LearnerConfig {
    pub alpha0: f64,
    pub decay: f64,
    pub gamma: f64,
    pub seed: u64,
    pub episodes: usize,
    /// Episodes are cut off after this many steps.
    pub max_steps: usize,
    pub slippery: bool,
    pub map: Vec<String>,
    /// Log the running return every n episodes. 0 disables it.
    pub report_every: usize,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        let defaults = LearnerOptions::default();
        LearnerConfig {
            alpha0: defaults.alpha0,
            decay: defaults.decay,
            gamma: defaults.gamma,
            seed: defaults.seed,
            episodes: 2000,
            max_steps: 100,
            slippery: true,
            map: DEFAULT_MAP.iter().map(|row| row.to_string()).collect(),
            report_every: 100,
        }
    }
}

impl LearnerConfig {
    pub fn options(&self) -> LearnerOptions {
        LearnerOptions {
            alpha0: self.alpha0,
            decay: self.decay,
            gamma: self.gamma,
            seed: self.seed,
        }
    }
}


/// Top level configuration file.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub rental: RentalConfig,
    pub solver: SolverConfig,
    pub learner: LearnerConfig,
}

impl Config {
    /// Read and validate a configuration file. The format follows the extension.
    pub fn load(path: &Path) -> Result<Config> {
        let config = Config::from_config_file(path)
            .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.rental.validate()?;
        self.solver.options().validate()?;
        self.learner.options().validate()?;
        if self.learner.max_steps == 0 {
            return Err(Error::InvalidConfig("learner max_steps must be at least 1".into()));
        }
        Ok(())
    }
}
