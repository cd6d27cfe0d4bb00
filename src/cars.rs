use std::fmt;

use log::debug;
use ndarray::{Array1, Array2};
use statrs::distribution::{Discrete, DiscreteCDF, Poisson};

use crate::config::RentalConfig;
use crate::error::{Error, Result};
use crate::model::{Transition, TransitionModel};


#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct State {
    pub n1: u8,  // Number of cars at site #1 at start of day
    pub n2: u8,  // Number of cars at site #2 at start of day
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(n1: {}, n2: {})", self.n1, self.n2)
    }
}

impl State {
    /// Flat index used by the transition model (row-major in `n1`).
    pub fn index(&self, max2: u8) -> usize {
        self.n1 as usize * (max2 as usize + 1) + self.n2 as usize
    }

    pub fn from_index(index: usize, max2: u8) -> State {
        let cols = max2 as usize + 1;
        State { n1: (index / cols) as u8, n2: (index % cols) as u8 }
    }
}


/// Visits every state in flat index order.
pub struct StateIterator {
    n1: u8,
    n2: u8,
    max_n1: u8,
    max_n2: u8,
    done: bool,
}

impl StateIterator {
    pub fn new(max_n1: u8, max_n2: u8) -> StateIterator {
        StateIterator { n1: 0, n2: 0, max_n1, max_n2, done: false }
    }
}

impl Iterator for StateIterator {
    type Item = State;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let state = State { n1: self.n1, n2: self.n2 };
        if self.n2 < self.max_n2 {
            self.n2 += 1;
        } else if self.n1 < self.max_n1 {
            self.n2 = 0;
            self.n1 += 1;
        } else {
            self.done = true;
        }
        Some(state)
    }
}


/// Distribution of one lot's overnight count, given the cars on the lot
/// after moving.
#[derive(Debug, Clone)]
struct LotOutcome {
    /// Probability of ending the day with n cars. Index: n
    prob: Array1<f64>,
    /// Sum over outcomes of P(rented, n) * rented. Index: n
    rented: Array1<f64>,
}


/// Car rental and return probabilities.
///
/// Precalculate rental and return probabilities when object is constructed.
/// Indices to probability tables x1, y1, x2, and y2 are
/// [cars on lot, number of cars rented or returned].
/// Use Poisson distribution to calculate probabilities.
pub struct CarProbs {
    /// Maximum number of cars that can be stored at location #1
    pub max1: u8,
    /// Loc 1 rental probs. Indexes: number of cars on lot, number of cars rented
    pub x1: Array2<f64>,
    /// Loc 1 return probs. Indexes: number of cars on lot, number of cars returned
    pub y1: Array2<f64>,
    /// Maximum number of cars that can be stored at location #2
    pub max2: u8,
    /// Loc 2 rental probs. Indexes: number of cars on lot, number of cars rented
    pub x2: Array2<f64>,
    /// Loc 2 return probs. Indexes: number of cars on lot, number of cars returned
    pub y2: Array2<f64>,
    /// Maximum number of cars that can be moved between loc #1 and loc #2
    pub max_move: u8,
    pub rent_reward: f64,
    pub move_cost: f64,
}

impl CarProbs {
    pub fn new(config: &RentalConfig) -> Result<CarProbs> {
        config.validate()?;
        Ok(CarProbs {
            max1: config.max1,
            x1: CarProbs::calc_rent_probs(config.rent_mean1, config.max1)?,
            y1: CarProbs::calc_return_probs(config.return_mean1, config.max1)?,
            max2: config.max2,
            x2: CarProbs::calc_rent_probs(config.rent_mean2, config.max2)?,
            y2: CarProbs::calc_return_probs(config.return_mean2, config.max2)?,
            max_move: config.max_move,
            rent_reward: config.rent_reward,
            move_cost: config.move_cost,
        })
    }

    fn poisson(mean: f32) -> Result<Poisson> {
        Poisson::new(f64::from(mean))
            .map_err(|e| Error::InvalidConfig(format!("Poisson mean {}: {}", mean, e)))
    }

    fn calc_rent_probs(mean: f32, max_n: u8) -> Result<Array2<f64>> {
        let rent_dist = CarProbs::poisson(mean)?;
        let dim = max_n as usize + 1;
        let mut x_probs = Array2::<f64>::zeros((dim, dim));
        for n in 0..=max_n {
            for x in 0..=max_n {
                x_probs[[n as usize, x as usize]] = CarProbs::rent_prob(n, x, &rent_dist);
            }
        }
        Ok(x_probs)
    }

    fn rent_prob(n: u8, x: u8, rent_dist: &Poisson) -> f64 {
        // No cars on lot, so only zero rentals allowed.
        if n == 0 {
            return if x == 0 { 1.0 } else { 0.0 };
        }
        // Renting fewer cars than what's on the lot.
        if x < n {
            return rent_dist.pmf(u64::from(x));
        }
        // Renting all cars on lot. Using 1 - CDF ensures probabilities sum to 1.0.
        if x == n {
            return 1.0 - rent_dist.cdf(u64::from(n - 1));
        }
        // x > n scenario is impossible.
        0.0
    }

    fn calc_return_probs(mean: f32, max_n: u8) -> Result<Array2<f64>> {
        let return_dist = CarProbs::poisson(mean)?;
        let dim = max_n as usize + 1;
        let mut y_probs = Array2::<f64>::zeros((dim, dim));
        for n in 0..=max_n {
            for y in 0..=max_n {
                y_probs[[n as usize, y as usize]] =
                    CarProbs::return_prob(n, y, max_n, &return_dist);
            }
        }
        Ok(y_probs)
    }

    fn return_prob(n: u8, y: u8, max_n: u8, return_dist: &Poisson) -> f64 {
        // Not enough room on lot to return that many cars.
        if y > max_n - n {
            return 0.0;
        }
        // Can only return 0 cars if lot is full.
        if n == max_n {
            return if y == 0 { 1.0 } else { 0.0 };
        }
        // Returning fewer cars than empty spaces on lot.
        if y < max_n - n {
            return return_dist.pmf(u64::from(y));
        }
        // Filling the lot. Using 1 - CDF ensures probabilities sum to 1.0.
        1.0 - return_dist.cdf(u64::from(max_n - n - 1))
    }

    /// Calculate the reward given the number of cars rented and action.
    pub fn reward(&self, rented: f64, a: i8) -> f64 {
        rented * self.rent_reward - self.move_cost * f64::from(a.unsigned_abs())
    }

    /// Actions run from -max_move to max_move. Positive moves cars from
    /// location #1 to location #2.
    pub fn actions(&self) -> Vec<i8> {
        let m = self.max_move as i8;
        (-m..=m).collect()
    }

    pub fn num_states(&self) -> usize {
        (self.max1 as usize + 1) * (self.max2 as usize + 1)
    }

    /// A move is legal if the source lot has the cars and the destination
    /// lot has room for them.
    pub fn is_legal(&self, s: &State, a: i8) -> bool {
        if a.unsigned_abs() > self.max_move {
            return false;
        }
        let after1 = i16::from(s.n1) - i16::from(a);
        let after2 = i16::from(s.n2) + i16::from(a);
        (0..=i16::from(self.max1)).contains(&after1)
            && (0..=i16::from(self.max2)).contains(&after2)
    }

    /// Overnight distribution of one lot that starts the day with `cars`.
    fn lot_outcome(x: &Array2<f64>, y: &Array2<f64>, max_n: u8, cars: u8) -> LotOutcome {
        let dim = max_n as usize + 1;
        let mut prob = Array1::<f64>::zeros(dim);
        let mut rented = Array1::<f64>::zeros(dim);
        for xr in 0..=cars {
            let px = x[[cars as usize, xr as usize]];
            if px == 0.0 {
                continue;
            }
            let left = cars - xr;
            for yr in 0..=(max_n - left) {
                let p = px * y[[left as usize, yr as usize]];
                if p == 0.0 {
                    continue;
                }
                let next = (left + yr) as usize;
                prob[next] += p;
                rented[next] += p * f64::from(xr);
            }
        }
        LotOutcome { prob, rented }
    }

    /// Build the car rental MDP.
    ///
    /// Each day cars are moved overnight, then rented, then returned. The
    /// reward of a transition is the expected rental income given the next
    /// state, less the cost of moving cars.
    pub fn build_model(&self) -> Result<TransitionModel> {
        let lots1: Vec<LotOutcome> = (0..=self.max1)
            .map(|m| CarProbs::lot_outcome(&self.x1, &self.y1, self.max1, m))
            .collect();
        let lots2: Vec<LotOutcome> = (0..=self.max2)
            .map(|m| CarProbs::lot_outcome(&self.x2, &self.y2, self.max2, m))
            .collect();

        let mut model = TransitionModel::new(self.num_states(), self.actions())?;
        let mut entries = 0;
        for s in StateIterator::new(self.max1, self.max2) {
            for a in self.actions() {
                if !self.is_legal(&s, a) {
                    continue;
                }
                let lot1 = &lots1[(i16::from(s.n1) - i16::from(a)) as usize];
                let lot2 = &lots2[(i16::from(s.n2) + i16::from(a)) as usize];
                let mut transitions = Vec::new();
                for (n1, (&p1, &r1)) in lot1.prob.iter().zip(lot1.rented.iter()).enumerate() {
                    if p1 == 0.0 {
                        continue;
                    }
                    for (n2, (&p2, &r2)) in lot2.prob.iter().zip(lot2.rented.iter()).enumerate() {
                        if p2 == 0.0 {
                            continue;
                        }
                        let expected_rented = r1 / p1 + r2 / p2;
                        let next = State { n1: n1 as u8, n2: n2 as u8 };
                        transitions.push(Transition {
                            next_state: next.index(self.max2),
                            probability: p1 * p2,
                            reward: self.reward(expected_rented, a),
                        });
                    }
                }
                entries += transitions.len();
                model.set_transitions(s.index(self.max2), a, transitions)?;
            }
        }
        debug!("Built car rental model: {} states, {} transitions",
               model.num_states(), entries);
        Ok(model)
    }

    fn show_array(arr: &Array2<f64>, row_prefix: &str) {
        print!("    cars on lot:");
        for n in 0..arr.dim().0 {
            print!("{:9}", n);
        }
        println!();
        for (x, col) in arr.columns().into_iter().enumerate() {
            print!("{row_prefix}: {x:>3} | ");
            for elem in col.iter() {
                print!("{:8.4} ", elem);
            }
            println!();
        }
    }

    pub fn show_probs(&self) {
        println!("\n=== Location #1 Rental Probabilities ===");
        CarProbs::show_array(&self.x1, "  cars rented");
        println!("\n=== Location #1 Return Probabilities ===");
        CarProbs::show_array(&self.y1, "cars returned");
        println!("\n=== Location #2 Rental Probabilities ===");
        CarProbs::show_array(&self.x2, "  cars rented");
        println!("\n=== Location #2 Return Probabilities ===");
        CarProbs::show_array(&self.y2, "cars returned");
    }
}
