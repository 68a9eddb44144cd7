use std::path::PathBuf;

use clap::Parser;

/// SSH honeypot: accepts connections, logs everything, pretends to be a box.
#[derive(Parser, Debug)]
#[command(name = "sshesame", version, about)]
pub struct Cli {
    /// Path to the YAML config file. Missing file uses built-in defaults.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory host keys are generated into/loaded from when config
    /// doesn't name explicit key paths.
    #[arg(short = 'd', long = "data-dir", value_name = "PATH", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Raise the ambient tracing filter; repeat for more (-v, -vv, -vvv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}
