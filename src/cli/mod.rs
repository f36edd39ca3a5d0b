//! Command Line Interface (CLI) layer for flexcal.
//!
//! This module defines argument parsing (`args`), error types (`errors`),
//! and the orchestration logic (`runner`): parameters are built from defaults,
//! an optional JSON config and command-line flags, then handed to
//! `flexcal::api::run_workspace`.
//!
//! If you are embedding flexcal into another application, prefer using
//! the high-level `flexcal::api` module instead of calling the CLI code.
pub mod args;
pub mod errors;
pub mod runner;

pub use args::CliArgs;
pub use runner::run;
