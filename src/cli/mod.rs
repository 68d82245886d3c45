pub mod commands;
pub mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::crawler::job::JobType;
use config::HarvesterConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a configuration file (defaults to the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume job queues until aborted
    Run {
        /// Job types to consume, overriding the configuration
        #[arg(short, long, value_delimiter = ',')]
        job_types: Vec<JobType>,
    },

    /// Push initial jobs for users and tweets
    Seed {
        /// User ids to seed (user, timeline and follower jobs)
        #[arg(short, long, value_delimiter = ',')]
        users: Vec<String>,

        /// Tweet ids to seed (comment jobs)
        #[arg(short, long, value_delimiter = ',')]
        tweets: Vec<String>,
    },

    /// Show the active configuration
    Config {
        /// Write the built-in defaults to the default location
        #[arg(short, long)]
        write_default: bool,
    },
}

/// Parse command line arguments
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Process the command
pub async fn process_command(cli: Cli) -> Result<()> {
    let config = HarvesterConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { job_types } => {
            info!("Starting harvest against {}", config.site.host);
            commands::run(config, job_types).await
        }
        Commands::Seed { users, tweets } => commands::seed(config, users, tweets).await,
        Commands::Config { write_default } => {
            if write_default {
                let defaults = HarvesterConfig::default();
                defaults.save_as_default()?;
                info!("Wrote default configuration");
                Ok(())
            } else {
                commands::show_config(&config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }
}
