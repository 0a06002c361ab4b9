//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

use strata_cli::CliError;

fn main() {
    match strata_cli::run() {
        Ok(()) => {}
        // Clap renders help, version and usage errors itself.
        Err(CliError::ArgumentParsing(err)) => err.exit(),
        Err(err) => {
            eprintln!("strata: {err}");
            std::process::exit(1);
        }
    }
}
