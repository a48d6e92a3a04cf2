use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relaypool::client::ClientManager;
use relaypool::pool::Destination;

#[derive(Parser)]
#[command(name = "relaypool")]
#[command(version, about = "Outbound connection pooling for message delivery", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe a destination: acquire, release, and reuse pooled connections
    Probe {
        /// Destination host (or socket path with --unix)
        host: String,

        /// Destination port
        #[arg(default_value = "25")]
        port: u16,

        /// Treat HOST as a unix-domain socket path
        #[arg(long)]
        unix: bool,

        /// Local address to bind outbound connections to
        #[arg(long)]
        local_addr: Option<std::net::IpAddr>,

        /// Number of acquire/release cycles
        #[arg(long, default_value = "3")]
        cycles: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Sequential acquire/release cycles need no worker threads.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = relaypool::config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Probe {
            host,
            port,
            unix,
            local_addr,
            cycles,
        } => {
            let manager = ClientManager::new(config.pool.clone());

            let mut dest = if unix {
                Destination::unix(host)
            } else {
                Destination::tcp(host, port)
            };
            if let Some(addr) = local_addr {
                dest = dest.with_local_addr(addr);
            }

            for cycle in 1..=cycles {
                let conn = manager.get_client(&dest).await?;
                println!("cycle {}: connection #{}", cycle, conn.id());
                manager.release_client(conn, false).await;
            }

            for (pool, stats) in manager.stats().await {
                println!(
                    "pool {}: created={} reused={} idle={} busy={}",
                    pool, stats.total_created, stats.total_reused, stats.idle, stats.busy
                );
            }

            manager.drain_pools().await;
        }
    }

    Ok(())
}
