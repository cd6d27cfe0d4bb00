use std::fmt::Display;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use ndarray::Array2;
use serde::Serialize;

use carlearn::cars::{CarProbs, State};
use carlearn::config::Config;
use carlearn::env::{train, Environment, FrozenLake};
use carlearn::policy::{PolicyTable, ValueTable};
use carlearn::qlearn::QLearner;
use carlearn::solver::{evaluate_policy, iterate_policy_in_place};
use carlearn::Error;


/// Command line argument parser.
#[derive(Parser, Debug)]
#[command(about = "Solve the Barto and Sutton Car Rental Problem", long_about = None)]
pub struct Args {
    /// Path to configuration TOML file.
    config_path: PathBuf,

    /// Log more detail (-v for every sweep).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}


#[derive(Subcommand, Debug)]
enum Commands {
    /// Print rental and return probabilities.
    Probs,
    /// Evaluate the policy that never moves cars.
    Evaluate,
    /// Solve for optimal policy with policy iteration.
    Solve {
        /// Write the policy and values to this CSV file.
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Train a Q-Learning agent on Frozen Lake.
    Learn {
        /// Overrides the configured number of episodes.
        #[arg(long)]
        episodes: Option<usize>,
    },
}


/// One row of the solution CSV.
#[derive(Serialize)]
struct SolutionRecord {
    n1: u8,
    n2: u8,
    action: i8,
    value: f64,
}


fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose)?;
    log::info!("Reading config file: {}", args.config_path.display());
    let config = Config::load(&args.config_path)
        .context("Unable to read configuration file")?;

    match &args.command {
        Commands::Probs => {
            let cprobs = CarProbs::new(&config.rental)?;
            cprobs.show_probs();
        }
        Commands::Evaluate => evaluate(&config)?,
        Commands::Solve { csv } => solve(&config, csv.as_deref())?,
        Commands::Learn { episodes } => learn(&config, *episodes)?,
    }
    Ok(())
}


fn setup_logging(verbosity: u8) -> Result<(), fern::InitError> {
    let log_level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}] {}", record.level(), message))
        })
        .level(log_level)
        .chain(std::io::stdout())
        .apply()?;
    Ok(())
}


fn build_model(config: &Config) -> anyhow::Result<(CarProbs, carlearn::model::TransitionModel)> {
    log::info!("Calculating rental and return probabilities.");
    let cprobs = CarProbs::new(&config.rental)?;
    let model = cprobs.build_model()?;
    model.validate(1e-6).context("Car rental model is malformed")?;
    Ok((cprobs, model))
}


fn evaluate(config: &Config) -> anyhow::Result<()> {
    let (cprobs, model) = build_model(config)?;
    let options = config.solver.options();
    let policy = PolicyTable::new(model.num_states(), 0);
    let mut values = ValueTable::new(model.num_states());
    let report = evaluate_policy(
        &model, &policy, &mut values, &options.evaluation,
        |sweep, v, _| log_values(sweep, v),
    )?;
    log::info!("Converged after {} sweeps", report.sweeps);
    let rows = cprobs.max1 as usize + 1;
    let cols = cprobs.max2 as usize + 1;
    println!("\n=== Values (rows: cars at #1, columns: cars at #2) ===");
    print_grid(&values.to_grid(rows, cols)?, 7, 1, true);
    Ok(())
}


fn solve(config: &Config, csv_path: Option<&Path>) -> anyhow::Result<()> {
    let (cprobs, model) = build_model(config)?;
    let options = config.solver.options();
    log::info!("Running policy iteration.");
    let mut policy = PolicyTable::new(model.num_states(), 0);
    let mut values = ValueTable::new(model.num_states());
    match iterate_policy_in_place(
        &model, &options, &mut policy, &mut values, |sweep, v, _| log_values(sweep, v),
    ) {
        Ok(report) => log::info!("Policy stable after {} iterations ({} sweeps)",
                                 report.iterations, report.sweeps),
        Err(err @ (Error::NotConverged { .. } | Error::PolicyNotStable { .. })) => {
            log::warn!("Keeping the last policy: {}", err);
        }
        Err(err) => return Err(err.into()),
    }

    let rows = cprobs.max1 as usize + 1;
    let cols = cprobs.max2 as usize + 1;
    println!("\n=== Policy (cars moved from #1 to #2) ===");
    print_grid(&policy.to_grid(rows, cols)?, 3, 0, true);
    println!("\n=== Values ===");
    print_grid(&values.to_grid(rows, cols)?, 7, 1, true);

    if let Some(path) = csv_path {
        write_solution(path, cprobs.max1, cprobs.max2, &policy, &values)
            .with_context(|| format!("Unable to write {}", path.display()))?;
        log::info!("Wrote solution to {}", path.display());
    }
    Ok(())
}


fn learn(config: &Config, episodes: Option<usize>) -> anyhow::Result<()> {
    let lc = &config.learner;
    let episodes = episodes.unwrap_or(lc.episodes);
    let mut env = FrozenLake::new(lc.map.as_slice(), lc.slippery, lc.seed)?;
    let mut learner = QLearner::new(env.num_states(), env.num_actions(), lc.options())?;
    log::info!("Training for {} episodes.", episodes);
    let returns = train(&mut env, &mut learner, episodes, lc.max_steps, lc.report_every)?;
    let successes = returns.iter().filter(|&&r| r > 0.0).count();
    log::info!("Reached the goal in {} of {} episodes", successes, episodes);

    let greedy: Vec<usize> = learner.q_table()
        .rows()
        .into_iter()
        .map(|row| QLearner::greedy(&row.to_owned()))
        .collect();
    let grid = Array2::from_shape_vec((env.rows(), env.cols()), greedy)?;
    println!("\n=== Greedy actions (0 left, 1 down, 2 right, 3 up) ===");
    print_grid(&grid, 2, 0, false);
    println!("\nRunning average return: {:.4}", learner.average_return());
    Ok(())
}


fn log_values(sweep: usize, values: &ValueTable) {
    let mean = values.as_array().mean().unwrap_or(0.0);
    log::info!("Sweep {}: mean state value {:.3}", sweep, mean);
}


/// Print a grid. With `bottom_up` the first row is printed last, like a plot.
fn print_grid<T: Display>(grid: &Array2<T>, width: usize, precision: usize, bottom_up: bool) {
    let rows: Vec<usize> = if bottom_up {
        (0..grid.nrows()).rev().collect()
    } else {
        (0..grid.nrows()).collect()
    };
    for r in rows {
        print!("{r:>3} | ");
        for elem in grid.row(r).iter() {
            print!("{:>width$.precision$} ", elem);
        }
        println!();
    }
    print!("      ");
    for c in 0..grid.ncols() {
        print!("{:>width$} ", c);
    }
    println!();
}


fn write_solution(
    path: &Path, max1: u8, max2: u8, policy: &PolicyTable, values: &ValueTable,
) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    let num_states = (max1 as usize + 1) * (max2 as usize + 1);
    for i in 0..num_states {
        let State { n1, n2 } = State::from_index(i, max2);
        writer.serialize(SolutionRecord {
            n1, n2, action: policy.get(i), value: values.get(i),
        })?;
    }
    writer.flush()?;
    Ok(())
}
