//! CLI entry point for arhd-online.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arhd_online::{Experiment, ExperimentConfig, Result};

#[derive(Parser)]
#[command(name = "arhd")]
#[command(about = "Online autoregressive forecasting with test-time training")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        config: String,
    },
    /// Train on the train split, then evaluate on the test split
    Run {
        /// Path to configuration file
        config: String,
        /// Override the output directory
        #[arg(long)]
        output: Option<String>,
    },
    /// Generate a sample configuration file
    Init {
        /// Output path for config file
        #[arg(default_value = "config.yaml")]
        output: String,
        /// Dataset preset (ohio540, etth1, ettm1)
        #[arg(long, default_value = "etth1")]
        preset: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            tracing::info!("Validating configuration: {}", config);
            let config = ExperimentConfig::from_file(&config)?;
            config.validate()?;
            println!("✓ Configuration is valid");
            println!("  Data: {}", config.data_file().display());
            println!("  Features: {:?}", config.features);
            println!(
                "  Window: seq_len={} pred_len={}",
                config.seq_len, config.pred_len
            );
        }
        Commands::Run { config, output } => {
            tracing::info!("Starting experiment with config: {}", config);
            let mut config = ExperimentConfig::from_file(&config)?;
            if let Some(output) = output {
                config.output_dir = output;
            }

            let mut experiment = Experiment::new(config)?;
            let report = experiment.run()?;
            println!("rse:{}, corr:{}", report.rse, report.corr);
            println!(
                "mae:{}, mse:{}, windows:{}",
                report.metrics.mae, report.metrics.mse, report.windows
            );
        }
        Commands::Init { output, preset } => {
            tracing::info!("Generating config for preset: {}", preset);
            let config = ExperimentConfig::from_preset(&preset)?;
            config.to_file(&output)?;
            println!("✓ Configuration written to: {output}");
        }
    }

    Ok(())
}
