//! # minitrace CLI
//!
//! Operator tool for MiniTrace: toggles the per-uid gate file that lets a
//! traced process start collecting coverage, and summarizes coverage files.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use minitrace_config::logging::{init_logging, LogLevel};
use minitrace_config::{log_cli_debug, Config, TracePaths};

mod gate;
mod summary;

/// MiniTrace - file-gated execution coverage
#[derive(Parser)]
#[command(name = "minitrace")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding the gate and coverage files
    #[arg(long, global = true, env = "MINITRACE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Uid of the traced app (defaults to the caller's uid)
    #[arg(long, global = true)]
    uid: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the gate file so the app may start tracing
    Enable,

    /// Remove the gate file
    Disable,

    /// Show gate and coverage file state
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Aggregate a coverage file into per-class coverage
    Summary {
        /// Coverage file (defaults to the one of --uid)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,

        /// Include one line per method
        #[arg(long)]
        methods: bool,
    },

    /// Delete the coverage file
    Clear,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print config file locations
    Path,
}

fn main() -> Result<()> {
    init_logging(LogLevel::Warn);

    let cli = Cli::parse();
    minitrace_config::reload().context("Failed to load configuration")?;
    let mut config = minitrace_config::config().clone();
    if let Some(dir) = &cli.data_dir {
        config.trace.data_dir = dir.clone();
    }
    let paths = match cli.uid {
        Some(uid) => TracePaths::for_uid(&config.trace, uid),
        None => config.paths(),
    };
    log_cli_debug!(
        "Resolved trace paths",
        uid = paths.uid,
        gate = tracing::field::display(paths.gate.display())
    );

    match cli.command {
        Commands::Enable => {
            if gate::enable(&paths)? {
                println!("Enabled tracing for uid {}: {}", paths.uid, paths.gate.display());
            } else {
                println!("Already enabled: {}", paths.gate.display());
            }
            Ok(())
        }
        Commands::Disable => {
            if gate::disable(&paths)? {
                println!("Disabled tracing for uid {}", paths.uid);
            } else {
                println!("Already disabled: {}", paths.gate.display());
            }
            Ok(())
        }
        Commands::Status { json } => {
            let status = gate::status(&paths);
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("{status}");
            }
            Ok(())
        }
        Commands::Summary {
            file,
            json,
            methods,
        } => {
            let path = file.unwrap_or_else(|| paths.coverage.clone());
            let summary = summary::load(&path)?;
            if json {
                println!("{}", summary::render_json(&summary)?);
            } else {
                println!("{}", summary::render_table(&summary, methods));
            }
            Ok(())
        }
        Commands::Clear => {
            if gate::clear(&paths)? {
                println!("Removed {}", paths.coverage.display());
            } else {
                println!("No coverage file at {}", paths.coverage.display());
            }
            Ok(())
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let toml = toml::to_string_pretty(&config).context("Failed to render config")?;
                print!("{toml}");
                Ok(())
            }
            ConfigCommands::Path => {
                match Config::global_config_path() {
                    Some(path) => println!("Global: {}", path.display()),
                    None => println!("Global: (no home directory)"),
                }
                match std::env::var("MINITRACE_CONFIG") {
                    Ok(path) => println!("Override: {path}"),
                    Err(_) => println!("Override: (MINITRACE_CONFIG not set)"),
                }
                Ok(())
            }
        },
    }
}
