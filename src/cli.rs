// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: One invocation runs one command on one remote host.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "agentssh")]
#[command(about = "Run a command on a remote host using keys from your SSH agent")]
#[command(version)]
pub struct Cli {
    /// Target as [user@]host[:port], or a host alias from the config file
    pub address: String,

    /// Command to run; words are joined with spaces and sent verbatim
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// Config file (default: agentssh.yml in the current directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Forward the SSH agent to the remote command
    #[arg(short = 'A', long)]
    pub forward_agent: bool,

    /// SSH agent socket (default: $SSH_AUTH_SOCK)
    #[arg(long)]
    pub socket: Option<PathBuf>,

    /// Connection timeout, e.g. "30s" or "2m"
    #[arg(long, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Remote environment variable, repeatable
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// How to deliver the command's output
    #[arg(long, value_enum, default_value_t = Mode::Stream)]
    pub mode: Mode,

    /// Send local stdin to the remote command
    #[arg(long)]
    pub stdin: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Stream stdout and stderr as they arrive
    Stream,
    /// Print stdout once the command succeeds
    Output,
    /// Print stdout and stderr interleaved once the command succeeds
    Combined,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {s:?}")),
    }
}
