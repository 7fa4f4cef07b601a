use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use utils::logging::LogFormat;

#[derive(Parser, Clone, Debug)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to a kubeconfig file. Uses in-cluster or default config when not set"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "DDS_CONFIG_NAMESPACE",
        default_value = "composable-dra",
        help = "Namespace of the ConfigMap holding the device compatibility table"
    )]
    pub config_namespace: String,

    #[arg(
        long,
        env = "DDS_CONFIG_NAME",
        default_value = "composable-dra-dds",
        help = "Name of the ConfigMap holding the device compatibility table"
    )]
    pub config_name: String,

    #[arg(
        long,
        env = "DDS_RECONCILE_INTERVAL",
        default_value = "60",
        help = "Seconds between two reconciliation passes"
    )]
    pub reconcile_interval: u64,

    #[arg(
        long = "node",
        help = "Only reconcile the given node. May be repeated; all nodes when omitted"
    )]
    pub nodes: Vec<String>,

    #[arg(
        long,
        help = "Run a single reconciliation pass and exit",
        default_value_t = false
    )]
    pub once: bool,

    #[arg(
        long,
        env = "DDS_LOG_FORMAT",
        value_enum,
        ignore_case = true,
        default_value_t = LogFormat::Text,
        help = "Log output format"
    )]
    pub log_format: LogFormat,
}

impl DaemonArgs {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval.max(1))
    }
}
