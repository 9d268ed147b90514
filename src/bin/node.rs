//! Node binary

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use txgate::{Config, Server};

#[derive(Parser)]
#[command(name = "txgate-node")]
#[command(about = "txgate node: HTTP façade over the replicated store")]
#[command(version)]
struct Cli {
    /// Configuration file (without extension)
    #[arg(long, default_value = "txgate")]
    config: String,

    /// Node name
    #[arg(long)]
    node: Option<String>,

    /// Names of all nodes in the cluster (comma-separated)
    #[arg(long, value_delimiter = ',')]
    cluster: Vec<String>,

    /// Data directory
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Average one-way network latency, in milliseconds
    #[arg(long)]
    latency: Option<u64>,

    /// HTTP API port
    #[arg(long)]
    port: Option<u16>,
}

impl Cli {
    /// Flags win over file and environment settings.
    fn apply(self, mut config: Config) -> Config {
        if let Some(node) = self.node {
            config.node = node;
        }
        if !self.cluster.is_empty() {
            config.cluster = self.cluster;
        }
        if let Some(dir) = self.dir {
            config.dir = dir;
        }
        if let Some(latency) = self.latency {
            config.latency_ms = latency;
        }
        if let Some(port) = self.port {
            config.api_port = port;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from(&cli.config)?;
    let config = cli.apply(config);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Server::new(config).serve().await?;

    Ok(())
}
