//! Adaptive controller CLI
//!
//! A command-line tool for inspecting a running controller's state, its
//! model version registry and the thresholds file it reads every cycle.

mod client;
mod commands;
mod config;
mod output;

use adapt_lib::{config::ThresholdConfig, models::ModelKind};
use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{status, thresholds, versions};
use std::path::PathBuf;

/// Adaptive controller CLI
#[derive(Parser)]
#[command(name = "adaptctl")]
#[command(author, version, about = "CLI for the Adaptive Inference Controller", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via ADAPT_API_URL env var)
    #[arg(long, env = "ADAPT_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    /// Enable verbose output
    #[arg(long, short)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the active model, energy debt and drift state
    Status {
        /// Thresholds file used to grade the debt (defaults to the configured path)
        #[arg(long)]
        thresholds: Option<PathBuf>,
    },

    /// Show component health and readiness
    Health,

    /// List stored model versions of a family
    Versions {
        /// Model family (linear, svm, lstm)
        family: ModelKind,
    },

    /// Inspect a thresholds file
    #[command(subcommand)]
    Thresholds(ThresholdsCommands),

    /// Manage CLI configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ThresholdsCommands {
    /// Show the thresholds the controller would use
    Show {
        /// Path to the thresholds file
        path: Option<PathBuf>,
    },

    /// Fail if any threshold would be replaced by its default
    Validate {
        /// Path to the thresholds file
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file location and contents
    Show,

    /// Persist defaults for later invocations
    Set {
        /// Default API endpoint URL
        #[arg(long)]
        api_url: Option<String>,

        /// Default thresholds file
        #[arg(long)]
        thresholds_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut settings = config::Config::load().unwrap_or_else(|e| {
        output::print_warning(&format!("Ignoring CLI config: {:#}", e));
        config::Config::default()
    });
    let api_url = settings.resolve_api_url(cli.api_url.clone());
    if cli.verbose {
        output::print_info(&format!("Using API at {}", api_url));
    }

    match cli.command {
        Commands::Status { thresholds } => {
            let path = settings.resolve_thresholds_path(thresholds);
            let max_debt = match std::fs::read(&path) {
                Ok(data) => ThresholdConfig::from_json_or_default(&data).max_debt,
                Err(_) => ThresholdConfig::default().max_debt,
            };
            let client = client::ApiClient::new(&api_url)?;
            status::show_status(&client, max_debt, cli.format).await?;
        }
        Commands::Health => {
            let client = client::ApiClient::new(&api_url)?;
            status::show_health(&client, cli.format).await?;
        }
        Commands::Versions { family } => {
            let client = client::ApiClient::new(&api_url)?;
            versions::list_versions(&client, family, cli.format).await?;
        }
        Commands::Thresholds(thresholds_cmd) => match thresholds_cmd {
            ThresholdsCommands::Show { path } => {
                thresholds::show_thresholds(&settings.resolve_thresholds_path(path), cli.format)?;
            }
            ThresholdsCommands::Validate { path } => {
                thresholds::validate_thresholds(&settings.resolve_thresholds_path(path))?;
            }
        },
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Show => {
                output::print_info(&format!(
                    "Config file: {}",
                    config::Config::config_path()?.display()
                ));
                output::print_json(&settings)?;
            }
            ConfigCommands::Set {
                api_url,
                thresholds_path,
            } => {
                if api_url.is_some() {
                    settings.api_url = api_url;
                }
                if thresholds_path.is_some() {
                    settings.thresholds_path = thresholds_path;
                }
                let path = settings.save()?;
                output::print_success(&format!("Saved {}", path.display()));
            }
        },
    }

    Ok(())
}
