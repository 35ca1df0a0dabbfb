//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

/// `rproxy <config-path>` — the proxy's entire surface is one config file.
#[derive(Debug, Parser)]
#[command(name = "rproxy", about = "Multi-threaded HTTP/1.x reverse proxy")]
pub struct Args {
    /// Path to the TOML configuration file.
    pub config_path: PathBuf,
}
