use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::metadata::LevelFilter;

use crate::ssm::command::CompletionPolicy;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)] // Read from `Cargo.toml`
pub struct Cli {
    /// Log level, overridden by `RUST_LOG`
    #[arg(long, global = true, default_value_t = LevelFilter::INFO)]
    pub log_level: LevelFilter,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a presigned download URL for an S3 object
    Presign(PresignArgs),
    /// Print the NodeConfig of a new node and write its credential files
    NodeConfig(NodeConfigArgs),
    /// Run shell commands on a managed instance
    RunCommands(RunCommandsArgs),
    /// Uninstall nodeadm from a node and wait for the credential provider to confirm it
    Uninstall(UninstallArgs),
}

#[derive(Args, Debug)]
pub struct PresignArgs {
    /// Object locator, such as `s3://bucket.s3.amazonaws.com/path/to/nodeadm`
    #[arg(long)]
    pub locator: String,

    /// AWS region of the bucket
    #[arg(long, default_value = "us-west-2")]
    pub region: String,

    /// Validity of the URL
    #[arg(long, default_value = "15m", value_parser = parse_duration_arg)]
    pub ttl: Duration,
}

#[derive(Args, Debug)]
pub struct NodeConfigArgs {
    #[arg(short, long)]
    pub config: PathBuf,

    /// Directory the node files are written to, keeping their absolute paths below it
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunCommandsArgs {
    #[arg(short, long)]
    pub config: PathBuf,

    /// Target managed instance
    #[arg(long)]
    pub instance_id: String,

    #[arg(long, value_enum, default_value_t = WaitMode::Terminal)]
    pub wait: WaitMode,

    /// Shell commands, run one at a time in order
    #[arg(last = true, required = true)]
    pub commands: Vec<String>,
}

#[derive(Args, Debug)]
pub struct UninstallArgs {
    #[arg(short, long)]
    pub config: PathBuf,

    /// EC2 instance id of the node
    #[arg(long)]
    pub instance_id: String,

    /// Name the node registered with, the managed instance id for SSM nodes
    #[arg(long)]
    pub node_name: String,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Wait until every command succeeds
    Terminal,
    /// Stop waiting once a command is in progress
    InProgress,
}

impl From<WaitMode> for CompletionPolicy {
    fn from(mode: WaitMode) -> Self {
        match mode {
            WaitMode::Terminal => CompletionPolicy::Terminal,
            WaitMode::InProgress => CompletionPolicy::InProgressAcceptable,
        }
    }
}

impl Cli {
    /// Parses command line arguments
    pub fn init() -> Self {
        Self::parse()
    }
}

fn parse_duration_arg(arg: &str) -> Result<Duration, String> {
    duration_str::parse(arg).map_err(|err| format!("invalid duration `{arg}`: {err}"))
}
