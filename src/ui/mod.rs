//! Terminal feedback for the CLI.

pub mod progress;
