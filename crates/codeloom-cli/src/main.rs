//! CLI entrypoint for the Codeloom orchestrator.
//!
//! The binary delegates to [`codeloom_cli::run`], which loads configuration,
//! parses the command and drives the requested pipeline.

use std::io;
use std::process::ExitCode;

fn main() -> ExitCode {
    // Unlocked handles: runtime worker threads log to stderr while this
    // thread blocks on the pipeline.
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();
    codeloom_cli::run(std::env::args_os(), &mut stdout, &mut stderr)
}
