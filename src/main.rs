//! flexcal CLI entrypoint.
//!
//! Provides a thin wrapper over the `cli` module: parse args, run the pipeline over a
//! work directory, and exit with a non-zero status and a message on fatal errors.
//! For programmatic use, prefer the library API (`flexcal::api`).

use std::process::ExitCode;

use clap::Parser;

mod cli;

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();
    match cli::run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("flexcal: {}", e);
            ExitCode::FAILURE
        }
    }
}
