use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "dispatch-console", version, about = "Remote execution dispatch console")]
pub(crate) struct Args {
    #[arg(long, default_value = "config/console.toml")]
    pub(crate) config: PathBuf,
    /// Overrides `base_url` from the config file; the file may then be absent.
    #[arg(long)]
    pub(crate) base_url: Option<String>,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
    /// Directory for daily-rolling JSON logs.
    #[arg(long)]
    pub(crate) log_dir: Option<PathBuf>,
    /// Print snapshots and pages as JSON lines.
    #[arg(long, default_value_t = false)]
    pub(crate) json: bool,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Submit a tool execution and follow it to completion.
    Run(RunArgs),
    /// Follow an existing execution.
    Watch { id: String },
    /// Show the execution list, optionally refreshing it.
    List(ListArgs),
    /// Run the steps of a plan file in order.
    Plan { path: PathBuf },
}

#[derive(ClapArgs, Debug)]
pub(crate) struct RunArgs {
    pub(crate) tool: String,
    #[arg(long)]
    pub(crate) target: Option<String>,
    /// Tool arguments as a JSON object.
    #[arg(long, value_name = "JSON")]
    pub(crate) args: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub(crate) struct ListArgs {
    #[arg(long)]
    pub(crate) status: Option<String>,
    #[arg(long)]
    pub(crate) tool: Option<String>,
    #[arg(long)]
    pub(crate) target: Option<String>,
    #[arg(long, default_value_t = 0)]
    pub(crate) page: u32,
    #[arg(long)]
    pub(crate) size: Option<u32>,
    #[arg(long)]
    pub(crate) sort: Option<String>,
    /// Keep refreshing at the configured interval until interrupted.
    #[arg(long, default_value_t = false)]
    pub(crate) watch: bool,
    /// Refresh interval such as `10s` or `2m`; implies `--watch`.
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) refresh: Option<Duration>,
}
