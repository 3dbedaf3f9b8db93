//! CLI subcommands

pub mod diagnostics;
pub mod root;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Check engine connectivity, database health, and proxy status
    Diagnostics,
}
