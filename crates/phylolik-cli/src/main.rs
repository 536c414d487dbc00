mod cli;
mod commands;
mod config;
mod error;
mod io;
mod logging;
mod utils;

use crate::cli::{Cli, Commands};
use crate::error::Result;
use crate::utils::progress::CliProgressHandler;
use clap::Parser;
use tracing::{debug, error, info};

fn main() {
    if let Err(e) = run_app() {
        eprintln!("\n❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn run_app() -> Result<()> {
    let cli = Cli::parse();
    logging::setup_logging(cli.verbose, cli.quiet, cli.log_file.as_deref())?;

    std::panic::set_hook(Box::new(|info| {
        error!("{}", info);
    }));

    info!("🚀 phylolik CLI v{} starting up.", env!("CARGO_PKG_VERSION"));
    debug!("Full CLI arguments parsed: {:?}", &cli);

    let progress_handler = if cli.quiet {
        CliProgressHandler::hidden()
    } else {
        CliProgressHandler::new()
    };

    let command_result = match cli.command {
        Commands::Likelihood(args) => {
            info!("Dispatching to 'likelihood' command.");
            commands::likelihood::run(args)
        }
        Commands::Optimize(args) => {
            info!("Dispatching to 'optimize' command.");
            commands::optimize::run(args, &progress_handler)
        }
        Commands::DistanceTree(args) => {
            info!("Dispatching to 'distance-tree' command.");
            commands::distance_tree::run(args, &progress_handler)
        }
    };

    match &command_result {
        Ok(_) => info!("✅ Command completed successfully."),
        Err(e) => error!("❌ Command failed: {}", e),
    }
    command_result
}
