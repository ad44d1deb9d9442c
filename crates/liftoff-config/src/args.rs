//! Command-line model for the launcher.

use clap::Parser;

use crate::logging::{DEFAULT_LOG_FILTER, LogFormat};

/// Scalar inputs accepted by the launcher.
///
/// JSON-valued options take either a path to a JSON file or an inline JSON
/// object. Every override is optional; absence never replaces a value set by
/// a lower layer.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "liftoff", about = "Starts a runtime and deploys a workload on it.")]
pub struct LaunchArgs {
    /// Runtime options, as a JSON file path or an inline JSON object.
    #[arg(long = "options", visible_alias = "runtime-options", value_name = "JSON")]
    pub runtime_options: Option<String>,
    /// Form a cluster with other runtimes on the network.
    #[arg(short = 'c', long)]
    pub cluster: bool,
    /// Host to bind for cluster communication.
    #[arg(long, value_name = "HOST")]
    pub cluster_host: Option<String>,
    /// Port to bind for cluster communication. A spare port is chosen by default.
    #[arg(long, value_name = "PORT")]
    pub cluster_port: Option<u16>,
    /// Host advertised to other cluster members. Defaults to the cluster host.
    #[arg(long, value_name = "HOST")]
    pub cluster_public_host: Option<String>,
    /// Port advertised to other cluster members. Defaults to the cluster port.
    #[arg(long, value_name = "PORT")]
    pub cluster_public_port: Option<u16>,
    /// Main workload deployment options, as a JSON file path or inline JSON.
    #[arg(long, value_name = "JSON")]
    pub deployment_options: Option<String>,
    /// Deploy the main workload on worker threads. Takes precedence over the
    /// deployment options.
    #[arg(short = 'w', long)]
    pub worker: bool,
    /// Number of workload instances to deploy. Takes precedence over the
    /// deployment options.
    #[arg(long, value_name = "COUNT", value_parser = clap::value_parser!(i32).range(1..))]
    pub instances: Option<i32>,
    /// Configuration handed to the workload, as a JSON file path or inline JSON.
    #[arg(long = "conf", value_name = "JSON")]
    pub config: Option<String>,
    /// Tracing filter expression. `RUST_LOG` takes precedence when set.
    #[arg(long, value_name = "FILTER", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
    /// Workload to deploy, optionally qualified as `factory:name`.
    #[arg(value_name = "WORKLOAD")]
    pub workload: Option<String>,
}

impl Default for LaunchArgs {
    fn default() -> Self {
        Self {
            runtime_options: None,
            cluster: false,
            cluster_host: None,
            cluster_port: None,
            cluster_public_host: None,
            cluster_public_port: None,
            deployment_options: None,
            worker: false,
            instances: None,
            config: None,
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            log_format: LogFormat::default(),
            workload: None,
        }
    }
}
