//! `sentry` binary entry point.

use clap::Parser;
use proximity_sentry::cli_app::{Cli, run};
use proximity_sentry::logger;

fn main() {
    let cli = Cli::parse();
    logger::init(cli.verbose);
    if let Err(err) = run(&cli) {
        eprintln!("sentry: {err}");
        std::process::exit(1);
    }
}
