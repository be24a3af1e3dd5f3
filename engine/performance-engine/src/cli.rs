//! # Command Line Interface
//!
//! Loads a JSON batch and a TOML configuration, runs the engine, and writes
//! the result rows as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::EngineConfig;
use crate::engine::{PerformanceEngine, RunOutput};
use crate::logging::initialize_logging;
use crate::models::RunInput;

/// Performance signal engine CLI
#[derive(Parser)]
#[command(name = "performance-cli")]
#[command(about = "Rolling-window, baseline and sustainability signals for skater game logs")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the engine over one batch
    Run {
        /// Batch file (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Engine configuration (TOML); defaults plus PERF_ENGINE__* overrides when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Where to write the output rows; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check a configuration file without running anything
    ValidateConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Print the default configuration as TOML
    DefaultConfig,
}

/// CLI handler
pub struct CliHandler;

impl CliHandler {
    /// Handle CLI commands
    pub async fn handle_command(command: Commands) -> Result<()> {
        match command {
            Commands::Run { input, config, output } => {
                Self::run(&input, config.as_deref(), output.as_deref()).await?;
            }
            Commands::ValidateConfig { config } => {
                Self::validate_config(&config)?;
            }
            Commands::DefaultConfig => {
                let rendered = EngineConfig::default().to_toml()?;
                println!("{}", rendered);
            }
        }
        Ok(())
    }

    fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
        match path {
            Some(path) => EngineConfig::load_from_file(path)
                .with_context(|| format!("Failed to load configuration from {:?}", path)),
            None => EngineConfig::load_from_env().context("Failed to load configuration from environment"),
        }
    }

    async fn run(input: &Path, config: Option<&Path>, output: Option<&Path>) -> Result<()> {
        let config = Self::load_config(config)?;
        initialize_logging(&config.logging)?;
        let engine = PerformanceEngine::new(&config).context("Invalid engine configuration")?;

        let raw = tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("Failed to read batch file {:?}", input))?;
        let batch: RunInput =
            serde_json::from_str(&raw).with_context(|| format!("Failed to parse batch file {:?}", input))?;

        // the run is CPU-bound and fans out on rayon
        let result: RunOutput = tokio::task::spawn_blocking(move || engine.run(batch))
            .await
            .context("Engine task panicked")??;

        let rendered = serde_json::to_string_pretty(&result)?;
        match output {
            Some(path) => {
                tokio::fs::write(path, rendered)
                    .await
                    .with_context(|| format!("Failed to write output to {:?}", path))?;
                info!("📄 Wrote output to {:?}", path);
            }
            None => println!("{}", rendered),
        }

        Self::print_summary(&result);
        Ok(())
    }

    fn validate_config(path: &Path) -> Result<()> {
        let config = Self::load_config(Some(path))?;
        let validated = config.validate().context("Configuration is invalid")?;

        eprintln!("✅ {:?} is valid", path);
        eprintln!("   Windows: {:?} (queue bound {})", validated.window_sizes, validated.queue_capacity);
        eprintln!("   Significance level: {}", validated.significance_level);
        eprintln!("   Signals:");
        for (signal, weight) in &validated.importance_weights {
            eprintln!("     {:<24} weight {:.4}", signal.to_string(), weight);
        }
        eprintln!("   Ranking: {} metrics by {:?}", validated.ranked_metrics.len(), validated.ranking_granularity);
        Ok(())
    }

    fn print_summary(result: &RunOutput) {
        eprintln!("📊 Run summary");
        eprintln!("   Window snapshots:    {}", result.window_snapshots.len());
        eprintln!("   Period aggregates:   {}", result.period_aggregates.len());
        eprintln!("   Sustainability rows: {}", result.sustainability.len());
        eprintln!("   Ranking rows:        {}", result.rankings.len());
        match &result.pca_model {
            Some(model) => eprintln!("   PCA:                 {} components over {} rows", model.components.len(), model.rows_fitted),
            None => eprintln!("   PCA:                 not fitted"),
        }
        if !result.failures.is_empty() {
            eprintln!("⚠️  {} players failed:", result.failures.len());
            for failure in &result.failures {
                eprintln!("   {}: {}", failure.player_id, failure.reason);
            }
        }
    }
}
