use std::fmt;

use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::qlearn::{Experience, QLearner};


/// The classic 4x4 Frozen Lake map.
pub const DEFAULT_MAP: [&str; 4] = ["SFFF", "FHFH", "FFFH", "HFFG"];


/// Diagnostics returned with every step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInfo {
    /// Probability of the transition that was taken.
    pub probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub next_state: usize,
    pub reward: f64,
    pub terminal: bool,
    pub info: StepInfo,
}


/// Discrete environment that can be stepped one action at a time.
pub trait Environment {
    fn num_states(&self) -> usize;

    fn num_actions(&self) -> usize;

    /// Start a new episode and return its first state.
    fn reset(&mut self) -> usize;

    fn step(&mut self, action: usize) -> Result<Step>;
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tile {
    Start,
    Frozen,
    Hole,
    Goal,
}

impl Tile {
    fn parse(c: char) -> Option<Tile> {
        match c {
            'S' => Some(Tile::Start),
            'F' => Some(Tile::Frozen),
            'H' => Some(Tile::Hole),
            'G' => Some(Tile::Goal),
            _ => None,
        }
    }

    fn symbol(&self) -> char {
        match self {
            Tile::Start => 'S',
            Tile::Frozen => 'F',
            Tile::Hole => 'H',
            Tile::Goal => 'G',
        }
    }
}


/// Moves on the lake, in action index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Move {
    Left = 0,
    Down = 1,
    Right = 2,
    Up = 3,
}

impl Move {
    pub const ALL: [Move; 4] = [Move::Left, Move::Down, Move::Right, Move::Up];

    pub fn from_index(index: usize) -> Result<Move> {
        Move::ALL.get(index)
            .copied()
            .ok_or(Error::ActionIndexOutOfRange { index, count: Move::ALL.len() })
    }

    /// The intended move followed by its two perpendicular moves.
    fn slips(self) -> [Move; 3] {
        let i = self as usize;
        [self, Move::ALL[(i + 3) % 4], Move::ALL[(i + 1) % 4]]
    }
}


/// Grid world where the agent walks from `S` to `G` without falling into an `H`.
///
/// States are cells in row-major order. Reaching the goal pays 1, everything
/// else pays 0. Holes and the goal end the episode. On a slippery lake the
/// agent moves in the chosen direction or one of the two perpendicular ones,
/// each with probability 1/3.
pub struct FrozenLake {
    tiles: Vec<Tile>,
    rows: usize,
    cols: usize,
    start: usize,
    position: usize,
    slippery: bool,
    rng: StdRng,
}

impl FrozenLake {
    pub fn new<S: AsRef<str>>(map: &[S], slippery: bool, seed: u64) -> Result<FrozenLake> {
        let rows = map.len();
        let cols = map.first().map(|row| row.as_ref().chars().count()).unwrap_or(0);
        if rows == 0 || cols == 0 {
            return Err(Error::InvalidConfig("lake map is empty".into()));
        }
        let mut tiles = Vec::with_capacity(rows * cols);
        for row in map {
            let row = row.as_ref();
            if row.chars().count() != cols {
                return Err(Error::InvalidConfig(format!(
                    "lake row {:?} is not {} cells wide", row, cols)));
            }
            for c in row.chars() {
                let tile = Tile::parse(c).ok_or_else(|| Error::InvalidConfig(
                    format!("unknown lake tile {:?}", c)))?;
                tiles.push(tile);
            }
        }
        let starts: Vec<usize> = tiles.iter()
            .enumerate()
            .filter(|(_, t)| **t == Tile::Start)
            .map(|(i, _)| i)
            .collect();
        if starts.len() != 1 {
            return Err(Error::InvalidConfig("lake needs exactly one start tile".into()));
        }
        if !tiles.contains(&Tile::Goal) {
            return Err(Error::InvalidConfig("lake needs a goal tile".into()));
        }
        Ok(FrozenLake {
            tiles, rows, cols,
            start: starts[0],
            position: starts[0],
            slippery,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn tile(&self, state: usize) -> Option<Tile> {
        self.tiles.get(state).copied()
    }

    fn moved(&self, from: usize, m: Move) -> usize {
        let (row, col) = (from / self.cols, from % self.cols);
        let (row, col) = match m {
            Move::Left => (row, col.saturating_sub(1)),
            Move::Down => ((row + 1).min(self.rows - 1), col),
            Move::Right => (row, (col + 1).min(self.cols - 1)),
            Move::Up => (row.saturating_sub(1), col),
        };
        row * self.cols + col
    }
}

impl Environment for FrozenLake {
    fn num_states(&self) -> usize {
        self.tiles.len()
    }

    fn num_actions(&self) -> usize {
        Move::ALL.len()
    }

    fn reset(&mut self) -> usize {
        self.position = self.start;
        self.position
    }

    fn step(&mut self, action: usize) -> Result<Step> {
        let intended = Move::from_index(action)?;
        let (m, probability) = if self.slippery {
            (intended.slips()[self.rng.gen_range(0..3)], 1.0 / 3.0)
        } else {
            (intended, 1.0)
        };
        self.position = self.moved(self.position, m);
        let tile = self.tiles[self.position];
        Ok(Step {
            next_state: self.position,
            reward: if tile == Tile::Goal { 1.0 } else { 0.0 },
            terminal: matches!(tile, Tile::Hole | Tile::Goal),
            info: StepInfo { probability },
        })
    }
}

impl fmt::Display for FrozenLake {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, tile) in self.tiles.iter().enumerate() {
            let c = if i == self.position { '*' } else { tile.symbol() };
            write!(f, "{}", c)?;
            if (i + 1) % self.cols == 0 {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}


/// Play one episode, learning from every step. Returns the episode return.
///
/// The learner only exposes noisy scores; the action taken is their argmax.
pub fn run_episode<E: Environment>(
    env: &mut E, learner: &mut QLearner, max_steps: usize,
) -> Result<f64> {
    let mut state = env.reset();
    let mut total = 0.0;
    for _ in 0..max_steps {
        let scores = learner.select_action(state)?;
        let action = QLearner::greedy(&scores);
        let step = env.step(action)?;
        learner.observe(&Experience {
            state,
            action,
            reward: step.reward,
            next_state: step.next_state,
            terminal: step.terminal,
        })?;
        total += step.reward;
        if step.terminal {
            return Ok(total);
        }
        state = step.next_state;
    }
    learner.end_episode();
    Ok(total)
}


/// Run `episodes` episodes and return each episode's return.
pub fn train<E: Environment>(
    env: &mut E, learner: &mut QLearner, episodes: usize, max_steps: usize,
    report_every: usize,
) -> Result<Vec<f64>> {
    let mut returns = Vec::with_capacity(episodes);
    for episode in 1..=episodes {
        returns.push(run_episode(env, learner, max_steps)?);
        if report_every > 0 && episode % report_every == 0 {
            info!("Episode {}: running average return {:.4}, learning rate {:.4}",
                  episode, learner.average_return(), learner.learning_rate());
        }
    }
    Ok(returns)
}


#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn lake() -> FrozenLake {
        FrozenLake::new(&DEFAULT_MAP, false, 0).unwrap()
    }

    #[test]
    fn default_map_layout() {
        let env = lake();
        assert_eq!(env.num_states(), 16);
        assert_eq!(env.num_actions(), 4);
        assert_eq!(env.tile(0), Some(Tile::Start));
        assert_eq!(env.tile(5), Some(Tile::Hole));
        assert_eq!(env.tile(15), Some(Tile::Goal));
        assert_eq!(env.to_string(), "*FFF\nFHFH\nFFFH\nHFFG\n");
    }

    #[test_case(0, 0; "Left wall")]
    #[test_case(3, 0; "Top wall")]
    #[test_case(1, 4; "Down")]
    #[test_case(2, 1; "Right")]
    fn moves_from_start(action: usize, expected: usize) {
        let mut env = lake();
        env.reset();
        let step = env.step(action).unwrap();
        assert_eq!(step.next_state, expected);
        assert_eq!(step.info.probability, 1.0);
        assert!(!step.terminal);
    }

    #[test]
    fn hole_ends_episode_without_reward() {
        let mut env = lake();
        env.reset();
        env.step(2).unwrap();
        let step = env.step(1).unwrap();
        assert_eq!(step.next_state, 5);
        assert!(step.terminal);
        assert_eq!(step.reward, 0.0);
    }

    #[test]
    fn goal_pays_one() {
        // Arrange
        let mut env = lake();
        env.reset();
        // Act: down, down, right, right, down, right
        let mut last = None;
        for action in [1, 1, 2, 2, 1, 2] {
            last = Some(env.step(action).unwrap());
        }
        // Assert
        let step = last.unwrap();
        assert_eq!(step.next_state, 15);
        assert!(step.terminal);
        assert_eq!(step.reward, 1.0);
    }

    #[test]
    fn slippery_moves_stay_perpendicular() {
        // Arrange
        let mut env = FrozenLake::new(&DEFAULT_MAP, true, 11).unwrap();
        let mut seen = std::collections::HashSet::new();
        // Act: moving right from the start lands right, down or stays put.
        for _ in 0..100 {
            env.reset();
            let step = env.step(2).unwrap();
            assert_eq!(step.info.probability, 1.0 / 3.0);
            seen.insert(step.next_state);
        }
        // Assert
        let expected: std::collections::HashSet<usize> = [0, 1, 4].into_iter().collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn rejects_bad_maps() {
        assert!(FrozenLake::new(&["SFX", "FFG"], false, 0).is_err());
        assert!(FrozenLake::new(&["SF", "FFG"], false, 0).is_err());
        assert!(FrozenLake::new(&["FF", "FG"], false, 0).is_err());
        assert!(FrozenLake::new(&["SF", "FF"], false, 0).is_err());
        assert!(FrozenLake::new::<&str>(&[], false, 0).is_err());
    }

    #[test]
    fn rejects_unknown_actions() {
        let mut env = lake();
        assert_eq!(
            env.step(4).unwrap_err(),
            Error::ActionIndexOutOfRange { index: 4, count: 4 });
    }

    #[test]
    fn truncated_episode_still_advances() {
        // Arrange: a lake with no reachable goal from the start in one step.
        let mut env = FrozenLake::new(&["SFFFFFFG"], false, 0).unwrap();
        let options = crate::qlearn::LearnerOptions { seed: 5, ..Default::default() };
        let mut learner = QLearner::new(env.num_states(), env.num_actions(), options).unwrap();
        // Act
        let total = run_episode(&mut env, &mut learner, 1).unwrap();
        // Assert
        assert_eq!(total, 0.0);
        assert_eq!(learner.episode(), 2);
    }
}
