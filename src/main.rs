//! Command-line driver: takes a directory containing `config.json` and
//! `dataset.bin`, runs the fit and prints the result fields.

use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use treebound::{fit, Configuration, Dataset};

fn run(directory: PathBuf) -> Result<(), Box<dyn Error>> {
    if !directory.is_dir() {
        return Err(format!("{:?} is not a valid directory", directory).into());
    }
    for file in ["config.json", "dataset.bin"] {
        if !directory.join(file).exists() {
            return Err(format!("{:?} does not exist", directory.join(file)).into());
        }
    }

    let config = Configuration::load(directory.join("config.json"))?;
    let dataset = Dataset::load(config, directory.join("dataset.bin"))?;

    let result = fit(&dataset)?;

    println!("Model: {}", result.model);
    println!("Graph Size: {}", result.graph_size);
    println!("Number of Iterations: {}", result.n_iterations);
    println!("Lower Bound: {}", result.lower_bound);
    println!("Upper Bound: {}", result.upper_bound);
    println!("Model Loss: {}", result.model_loss);
    println!("Time Elapsed: {}", result.time_elapsed);
    println!("Status: {}", result.status);

    Ok(())
}

fn main() -> ExitCode {
    let mut args = env::args();
    let program = args.next().unwrap_or_else(|| "treebound".to_string());
    let Some(directory) = args.next() else {
        eprintln!("Usage: {} <directory>", program);
        return ExitCode::FAILURE;
    };

    match run(PathBuf::from(directory)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("Error: {}", error);
            ExitCode::FAILURE
        }
    }
}
