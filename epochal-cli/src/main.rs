//! Epochal CLI: run names, experiment plans, replays and checkpoint inspection.

mod commands;
mod replay;

use clap::Parser;
use std::path::PathBuf;

/// Epochal: metric bookkeeping and checkpoint rotation for training runs
#[derive(Parser, Debug)]
#[command(name = "epochal", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (replaces the workspace config)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print the run name derived from overrides
    RunName {
        /// `key=value` overrides
        overrides: Vec<String>,
    },
    /// Resolve the experiment layout without training
    Plan {
        overrides: Vec<String>,

        /// Copy sources from this directory into the experiment's code dir
        #[arg(long)]
        backup_source: Option<PathBuf>,

        /// Device count used to split global loader sizes
        #[arg(long, default_value_t = 1)]
        devices: u64,
    },
    /// Drive a training session from recorded batch events (JSON lines)
    Replay {
        events: PathBuf,
        overrides: Vec<String>,
    },
    /// Print the metric history and best values stored in a checkpoint
    Inspect { checkpoint: PathBuf },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Show the merged configuration
    Show { overrides: Vec<String> },
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let ctx = commands::Context {
        workspace,
        config_file: cli.config,
        level_override: match cli.verbose {
            0 if cli.quiet => Some("error"),
            0 => None,
            1 => Some("debug"),
            _ => Some("trace"),
        },
    };
    commands::handle_command(cli.command, &ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_plan() {
        let cli = Cli::try_parse_from([
            "epochal",
            "-vv",
            "plan",
            "lr=0.1",
            "model.depth=50",
            "--backup-source",
            "src",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Plan {
                overrides,
                backup_source,
                devices,
            } => {
                assert_eq!(overrides, vec!["lr=0.1", "model.depth=50"]);
                assert_eq!(backup_source, Some(PathBuf::from("src")));
                assert_eq!(devices, 1);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
