use std::process;

use formflat::cli::Cli;

/// Entry point for the formflat export tool.
///
/// # Exit Codes
/// * 0 - Success
/// * 1 - Error (message printed to stderr)
fn main() {
    if let Err(e) = Cli::init().and_then(Cli::execute) {
        eprintln!("Error: {e:?}");
        process::exit(1);
    }
}
