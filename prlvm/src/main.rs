use clap::Parser;
use prl_driver::DriverError;
use tracing::info;

mod cli;
mod commands;

use cli::Args;
use commands::execute_command;

fn main() {
    let args = Args::parse();

    // The guard flushes the file appender on exit.
    let _log_guard = if args.debug {
        prl_logging::init_with_default_level("debug")
    } else {
        prl_logging::init_subscriber()
    };

    if args.debug {
        info!("Starting prlvm command");
    }

    if let Err(e) = execute_command(args) {
        match e.downcast_ref::<DriverError>() {
            Some(driver_error) => eprintln!("❌ {}", driver_error.user_friendly()),
            None => eprintln!("❌ {e:#}"),
        }
        std::process::exit(1);
    }
}
