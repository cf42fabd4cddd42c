use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "relaypulse")]
#[command(version = concat!("Ver:", env!("CARGO_PKG_VERSION")))]
#[command(about = "Active-probing availability monitor for LLM chat-completion APIs")]
pub struct Cli {
    /// Path to the YAML config file.
    #[arg(short = 'c', long = "config", default_value = "relaypulse.yaml")]
    pub config: PathBuf,

    /// Run every enabled monitor once and exit, instead of starting the
    /// scheduler loop. Useful for validating a config against live
    /// endpoints without waiting for the first tick.
    #[arg(long = "once")]
    pub once: bool,

    /// Parse and validate the config, print a summary of the monitor
    /// roster, and exit without probing anything.
    #[arg(long = "validate-config")]
    pub validate_config: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
