//! Dynamic programming and tabular Q-Learning for small Markov decision
//! processes, built around the Barto and Sutton car rental problem.

pub mod cars;
pub mod config;
pub mod env;
pub mod error;
pub mod model;
pub mod policy;
pub mod qlearn;
pub mod solver;

pub use error::{Error, Result};
