use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use tactical::config::PipelineConfig;
use tactical::data::{load_market_csv, missing_summary, write_submission};
use tactical::pipeline::{run_backtest, run_predict};

#[derive(Parser)]
#[command(name = "tactical")]
#[command(about = "Walk-forward market timing: forecast next-day excess returns and size a 0-2x index position")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a walk-forward backtest over a historical data file
    Backtest {
        /// Path to the training CSV (date_id, forward_returns, risk_free_rate, feature columns)
        data_file: PathBuf,
        /// Optional JSON pipeline configuration
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// Fit on a training file and emit position weights for a test file
    Predict {
        /// Path to the training CSV
        train_file: PathBuf,
        /// Path to the test CSV
        test_file: PathBuf,
        /// Destination for the weights CSV
        #[arg(short, long, value_name = "PATH", default_value = "submission.csv")]
        output: PathBuf,
        /// Optional JSON pipeline configuration
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,
    },
    /// Report per-column missing-value counts for a data file
    InspectMissing {
        /// Path to the data CSV
        data_file: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    let config = match path {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Backtest { data_file, config } => {
            let config = load_config(config.as_ref())?;
            let data = load_market_csv(&data_file)?;
            info!("loaded {} rows from {}", data.num_rows(), data_file.display());
            let outcome = run_backtest(&data, &config)?;
            println!("{}", serde_json::to_string_pretty(&outcome.report)?);
        }
        Commands::Predict {
            train_file,
            test_file,
            output,
            config,
        } => {
            let config = load_config(config.as_ref())?;
            let train = load_market_csv(&train_file)?;
            let test = load_market_csv(&test_file)?;
            info!(
                "loaded {} training rows, {} test rows",
                train.num_rows(),
                test.num_rows()
            );
            let weights = run_predict(&train, &test, &config)?;
            let (ids, values): (Vec<i64>, Vec<f64>) = weights.into_iter().unzip();
            write_submission(&output, &ids, &values)?;
            info!("wrote {} weights to {}", ids.len(), output.display());
        }
        Commands::InspectMissing { data_file } => {
            let data = load_market_csv(&data_file)?;
            let rows = data.num_rows();
            println!("{rows} rows, {} feature columns", data.feature_names.len());
            for entry in missing_summary(&data) {
                println!(
                    "{:<32} {:>8} missing ({:.2}%)",
                    entry.column, entry.missing, entry.percent
                );
            }
        }
    }
    Ok(())
}
