use std::process::ExitCode;

use clap::Parser;

use graffiti_canvas::cli::{self, CliArgs};
use graffiti_canvas::logger;

fn main() -> ExitCode {
    // Parse first so --help / --version never touch the log file
    let args = CliArgs::parse();
    logger::init();
    log::info!("command: {:?}", args.command);
    cli::run(args)
}
