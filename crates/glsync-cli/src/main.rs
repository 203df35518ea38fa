//! glsync CLI - migrate GitLab group trees between instances.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod logging;

/// glsync - GitLab group tree migration
#[derive(Parser, Debug)]
#[command(name = "glsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Copy the group tree from the source to the destination instance
    Migrate(commands::MigrateArgs),

    /// Validate a credentials file
    CheckConfig {
        /// Credentials file
        #[arg(short, long, default_value = "creds.json")]
        config: PathBuf,

        /// URL of the staging instance
        #[arg(long, default_value = "https://staging.gitlab.internal")]
        staging_url: String,

        /// URL of the final instance
        #[arg(long, default_value = "https://git.example.com")]
        final_url: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let general_log = match &cli.command {
        Commands::Migrate(args) => Some(args.general_log.as_path()),
        _ => None,
    };
    if let Err(e) = logging::init(cli.verbose, general_log) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }

    let result = match &cli.command {
        Commands::Migrate(args) => commands::migrate(args).await,
        Commands::CheckConfig {
            config,
            staging_url,
            final_url,
        } => commands::check_config(config, staging_url, final_url),
        Commands::Version => {
            println!("glsync {}", glsync_migrate::VERSION);
            Ok(())
        }
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "Run failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
