use std::path::PathBuf;

use clap::Parser;

/// Transparent MITM SSH proxy: terminates a client, relays everything to a
/// real upstream server, and logs every hop.
#[derive(Parser, Debug)]
#[command(name = "sshesame-proxy", version, about)]
pub struct Cli {
    /// Path to the YAML config file. Missing file uses built-in defaults.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory the proxy's own host key is generated into/loaded from.
    #[arg(short = 'd', long = "data-dir", value_name = "PATH", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Raise the ambient tracing filter; repeat for more (-v, -vv, -vvv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}
