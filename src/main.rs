use clap::{Parser, Subcommand};
use credence::{predict, train};
use std::error::Error;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(
    name = "credence",
    about = "Hierarchical Bayesian modeling of belief dynamics",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit the model to labeled observations and publish run artifacts
    Train {
        /// Path to the observation CSV
        #[arg(long)]
        data: PathBuf,
        /// Comma-separated feature column names, in order
        #[arg(long, value_delimiter = ',', required = true)]
        features: Vec<String>,
        /// Output directory for the run artifacts
        #[arg(long)]
        out: PathBuf,
        /// Posterior draws to keep per chain
        #[arg(long, default_value_t = 1000)]
        draws: usize,
        /// Warmup iterations per chain, discarded
        #[arg(long, default_value_t = 1000)]
        tune: usize,
        /// Number of sampling chains
        #[arg(long, default_value_t = 4)]
        chains: usize,
        /// Target acceptance statistic for step-size adaptation
        #[arg(long, default_value_t = 0.9)]
        target_accept: f64,
        /// Base RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Score new observations with a trained run's artifacts
    Predict {
        /// Path to the saved posterior artifact
        #[arg(long)]
        posterior: PathBuf,
        /// Path to the saved encoding record
        #[arg(long)]
        encodings: PathBuf,
        /// Path to the observation CSV to score
        #[arg(long)]
        data: PathBuf,
        /// Comma-separated feature column names; must match training
        #[arg(long, value_delimiter = ',', required = true)]
        features: Vec<String>,
        /// Path of the scored output CSV
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Train {
            data,
            features,
            out,
            draws,
            tune,
            chains,
            target_accept,
            seed,
        } => {
            let config = train::TrainConfig {
                draws,
                tune,
                chains,
                target_accept,
                seed,
            };
            train_command(&data, &features, &out, &config)
        }
        Commands::Predict {
            posterior,
            encodings,
            data,
            features,
            out,
        } => predict_command(&posterior, &encodings, &data, &features, &out),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn train_command(
    data: &std::path::Path,
    features: &[String],
    out: &std::path::Path,
    config: &train::TrainConfig,
) -> Result<(), Box<dyn Error>> {
    let artifacts = train::train(data, features, out, config)?;
    println!("Posterior:  {}", artifacts.posterior_path.display());
    println!("Encodings:  {}", artifacts.encodings_path.display());
    println!("Summary:    {}", artifacts.summary_path.display());
    if let Some(calibration) = artifacts.calibration {
        println!(
            "Calibration: mean predicted {:.4} vs observed {:.4} over {} rows",
            calibration.mean_p, calibration.mean_y, calibration.n_observations
        );
    }
    Ok(())
}

fn predict_command(
    posterior: &std::path::Path,
    encodings: &std::path::Path,
    data: &std::path::Path,
    features: &[String],
    out: &std::path::Path,
) -> Result<(), Box<dyn Error>> {
    let report = predict::predict(posterior, encodings, data, features, out)?;
    println!(
        "Scored {} rows -> {}",
        report.n_rows,
        report.output_path.display()
    );
    Ok(())
}
