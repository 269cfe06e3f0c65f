//! Command line and environment configuration of the operator, using the `clap` crate.
//!
//! Every option can also be set through the environment variable of the same name, for example
//! `--resync-interval` through `RESYNC_INTERVAL`.

use std::time::Duration;

use clap::{Args, Parser};

use crate::{controller::ControllerOptions, logging::LogFormat};

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(
    name = "cloud-provider-config-operator",
    version,
    about = "Keeps the cloud provider configuration of the cluster converged"
)]
pub struct Opts {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Eq, clap::Subcommand)]
pub enum Command {
    /// Run the operator.
    Run(RunArguments),
}

/// CLI arguments the operator takes when running.
#[derive(Debug, PartialEq, Eq, Args)]
pub struct RunArguments {
    /// Field manager used when writing objects to the Kubernetes API.
    #[arg(long, env, default_value = "aro-cloud-provider-config")]
    pub field_manager: String,

    /// How often the cloud provider configuration is checked for drift even if no change was
    /// observed, e.g. `10m`.
    #[arg(long, env, default_value = "10m", value_parser = humantime::parse_duration)]
    pub resync_interval: Duration,

    /// How long to wait before retrying a failed reconciliation, e.g. `5s`.
    #[arg(long, env, default_value = "5s", value_parser = humantime::parse_duration)]
    pub error_requeue_delay: Duration,

    /// Format of the log lines written to stdout.
    #[arg(long, env, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,
}

impl RunArguments {
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            resync_interval: self.resync_interval,
            error_requeue_delay: self.error_requeue_delay,
        }
    }
}
