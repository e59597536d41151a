use crate::config::parse_duration;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "kube-update-exporter",
    version,
    about = "Exports whether running containers lag behind their Flux ImagePolicy"
)]
pub struct Cli {
    #[arg(long, env = "CONFIG_PATH", help = "Path to the YAML config file")]
    pub config: Option<PathBuf>,
    #[arg(long, value_parser = parse_duration, help = "Polling interval, e.g. 5m")]
    pub interval: Option<Duration>,
    #[arg(
        long,
        value_parser = parse_duration,
        help = "Deadline for each list call, defaults to half the interval"
    )]
    pub fetch_timeout: Option<Duration>,
    #[arg(long, help = "The address to listen on for HTTP requests")]
    pub listen_address: Option<SocketAddr>,
    #[arg(long, help = "Kubeconfig used when not running in-cluster")]
    pub kubeconfig: Option<PathBuf>,
}
