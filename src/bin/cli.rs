//! CLI for driving txgate nodes

use clap::{Parser, Subcommand};
use std::time::Duration;
use txgate::ops::{wait_ready, Client};

#[derive(Parser)]
#[command(name = "txgate")]
#[command(about = "txgate workload and membership CLI")]
#[command(version)]
struct Cli {
    /// Node URL
    #[arg(long, default_value = "http://localhost:8080")]
    url: String,

    /// Request timeout in milliseconds
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an append batch
    Append {
        /// Batch, e.g. "[[:append 1 10][:r 1 nil]]"
        batch: String,
    },

    /// Show account balances
    Balances,

    /// Create the bank accounts
    BankInit {
        /// Account ids (comma-separated)
        #[arg(long, value_delimiter = ',', required = true)]
        accounts: Vec<i64>,

        /// Amount split evenly across accounts
        #[arg(long)]
        total: i64,
    },

    /// Transfer between two accounts
    Transfer {
        #[arg(long)]
        from: i64,

        #[arg(long)]
        to: i64,

        #[arg(long)]
        amount: i64,
    },

    /// Show the set
    Set,

    /// Add an element to the set
    SetAdd { value: String },

    /// Show the current leader
    Leader,

    /// List cluster members
    Members,

    /// Remove a member by name
    Remove { identity: String },

    /// Check cluster readiness once
    Ready,

    /// Poll readiness until the cluster settles
    WaitReady {
        #[arg(long, default_value = "30")]
        attempts: u32,

        /// Pause between polls
        #[arg(long, default_value = "1s", value_parser = parse_interval)]
        interval: Duration,
    },
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    txgate::common::parse_duration(s).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = Client::new(&cli.url, Duration::from_millis(cli.timeout_ms))?;

    let reply = match cli.command {
        Commands::Append { batch } => client.append(&batch).await?,
        Commands::Balances => client.balances().await?,
        Commands::BankInit { accounts, total } => client.init_accounts(&accounts, total).await?,
        Commands::Transfer { from, to, amount } => client.transfer(from, to, amount).await?,
        Commands::Set => client.set_read().await?,
        Commands::SetAdd { value } => client.set_add(&value).await?,
        Commands::Leader => client.leader().await?,
        Commands::Members => client.members().await?,
        Commands::Remove { identity } => client.remove(&identity).await?,
        Commands::Ready => client.ready().await?,
        Commands::WaitReady { attempts, interval } => {
            wait_ready(&client, attempts, interval).await?;
            "nil".to_string()
        }
    };
    println!("{}", reply);

    Ok(())
}
