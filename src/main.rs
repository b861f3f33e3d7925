//! CDN ensemble CLI
//!
//! Trains the three-member regression ensemble and predicts with it.

use clap::{Parser, Subcommand};
use cdn::{Config, Result};

#[derive(Parser)]
#[command(name = "cdn")]
#[command(about = "Train and run a three-model regression ensemble", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train all three ensemble members
    Train {
        /// Training table (tab-separated)
        data: String,
        /// Directory receiving one sub-directory per model
        #[arg(long, default_value = "model")]
        model_dir: String,
        /// Only train on rows from these datasets (comma-separated)
        #[arg(long, value_delimiter = ',')]
        datasets: Vec<String>,
        /// Override batch size
        #[arg(long)]
        batch_size: Option<usize>,
        /// Override learning rate
        #[arg(long)]
        learning_rate: Option<f64>,
        /// Override number of training steps
        #[arg(long)]
        steps: Option<usize>,
    },
    /// Predict with the ensemble and write the averaged result
    Predict {
        /// Input table (tab-separated)
        data: String,
        /// Directory holding the trained models
        #[arg(long, default_value = "model")]
        model_dir: String,
        /// Output file for the averaged predictions
        #[arg(long, default_value = "cdn_predictions.txt")]
        out: String,
    },
    /// Show information about trained models
    Info {
        #[arg(long, default_value = "model")]
        model_dir: String,
    },
    /// List the architecture presets
    Presets,
    /// Write a default config file
    Init,
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load or create config
    let config = if std::path::Path::new(&cli.config).exists() {
        match Config::load(&cli.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error loading config: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        Config::default()
    };

    let result = match cli.command {
        Commands::Train {
            data,
            model_dir,
            datasets,
            batch_size,
            learning_rate,
            steps,
        } => commands::train(
            &config,
            &data,
            &model_dir,
            &datasets,
            batch_size,
            learning_rate,
            steps,
        ),
        Commands::Predict {
            data,
            model_dir,
            out,
        } => commands::predict(&config, &data, &model_dir, &out),
        Commands::Info { model_dir } => commands::info(&model_dir),
        Commands::Presets => commands::presets(),
        Commands::Init => commands::init(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

mod commands {
    use super::*;
    use cdn::ensemble;
    use cdn::model::checkpoint::{model_path, ModelMetadata};
    use cdn::model::PRESETS;
    use std::path::Path;

    pub fn init(config_path: &str) -> Result<()> {
        let config = Config::default();
        config.save(config_path)?;
        println!("Created default config at {}", config_path);

        println!("\nNext steps:");
        println!("  1. Edit {} to set target columns and training settings", config_path);
        println!("  2. Run 'cdn train <data.txt>' to train the ensemble");
        println!("  3. Run 'cdn predict <samples.txt>' to predict");
        Ok(())
    }

    pub fn train(
        config: &Config,
        data: &str,
        model_dir: &str,
        datasets: &[String],
        batch_size: Option<usize>,
        learning_rate: Option<f64>,
        steps: Option<usize>,
    ) -> Result<()> {
        let batch_size = batch_size.unwrap_or(config.training.batch_size);
        let learning_rate = learning_rate.unwrap_or(config.training.learning_rate);
        let num_steps = steps.unwrap_or(config.training.num_steps);

        if datasets.is_empty() {
            println!("Training on all datasets in {}", data);
        } else {
            println!("Training on datasets {} in {}", datasets.join(", "), data);
        }

        let summaries = ensemble::training(
            config,
            Path::new(data),
            datasets,
            Path::new(model_dir),
            batch_size,
            learning_rate,
            num_steps,
        )?;

        println!("\nTraining complete!");
        for s in &summaries {
            println!(
                "  {:<6} final loss {} (best {:.5} at step {}, improved by {}) -> {}",
                s.preset,
                format_loss(s.final_loss),
                s.best_loss,
                s.best_step,
                format_loss(s.improvement),
                s.model_dir.display()
            );
        }
        Ok(())
    }

    pub fn predict(config: &Config, data: &str, model_dir: &str, out: &str) -> Result<()> {
        let averaged =
            ensemble::prediction(config, Path::new(model_dir), Path::new(data), Path::new(out))?;

        println!(
            "Predicted {} samples ({}) -> {}",
            averaged.n_rows(),
            averaged.columns.join(", "),
            out
        );
        Ok(())
    }

    pub fn info(model_dir: &str) -> Result<()> {
        for preset in PRESETS.iter() {
            let dir = model_path(model_dir, preset.name);
            match ModelMetadata::load(&dir) {
                Ok(meta) => {
                    println!("{}:", preset.name);
                    println!("  Hidden units:  {:?}", meta.architecture.hidden_units);
                    println!("  Dropout rates: {:?}", meta.architecture.dropout_rates);
                    println!(
                        "  Inputs:        {} features ({:?} scaling)",
                        meta.feature_names.len(),
                        meta.scaling
                    );
                    println!(
                        "  Outputs:       {} ({:?})",
                        meta.target_names.join(", "),
                        meta.output
                    );
                    println!(
                        "  Trained:       {} steps, batch {}, lr {} on {} samples",
                        meta.num_steps, meta.batch_size, meta.learning_rate, meta.trained_samples
                    );
                    println!("  Final loss:    {}", format_loss(meta.final_loss));
                    println!("  Trained at:    {}", meta.trained_at);
                }
                Err(cdn::CdnError::NoModel(_)) => {
                    println!("{}: not trained ({})", preset.name, dir.display());
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn format_loss(loss: Option<f64>) -> String {
        match loss {
            Some(l) => format!("{:.5}", l),
            None => "n/a".to_string(),
        }
    }

    pub fn presets() -> Result<()> {
        println!("{:<8} {:<24} {}", "Preset", "Hidden units", "Dropout rates");
        for preset in PRESETS.iter() {
            println!(
                "{:<8} {:<24} {:?}",
                preset.name,
                format!("{:?}", preset.hidden_units),
                preset.dropout_rates
            );
        }
        Ok(())
    }
}
