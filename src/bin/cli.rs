//! CLI for talking to a quorumkv coordinator

use clap::{Parser, Subcommand};
use quorumkv::common::parse_duration;
use quorumkv::protocol::ClientResponse;
use quorumkv::{Key, KvClient, Status};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "quorumkv")]
#[command(about = "quorumkv replicated key-value store CLI")]
#[command(version)]
struct Cli {
    /// Coordinator address
    #[arg(long, global = true, default_value = "127.0.0.1:55555")]
    coordinator: SocketAddr,

    /// Attempts per request
    #[arg(long, global = true, default_value = "3")]
    retries: usize,

    /// Reply timeout per attempt (e.g. "500ms", "15s")
    #[arg(long, global = true, default_value = "15s", value_parser = parse_timeout)]
    timeout: Duration,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a value
    Put {
        /// Key (UTF-8, zero-padded to 32 bytes)
        key: String,

        /// Value
        value: String,
    },

    /// Fetch a value
    Get {
        /// Key
        key: String,
    },

    /// Remove a key
    Remove {
        /// Key
        key: String,
    },

    /// Stop the coordinator's node
    Shutdown,
}

fn parse_timeout(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

fn print_response(response: &ClientResponse) {
    match response.status {
        Status::Successful if !response.value.is_empty() => {
            println!(
                "{} (version {}): {}",
                response.status,
                response.version,
                String::from_utf8_lossy(&response.value)
            );
        }
        Status::Successful | Status::NonExistentKey if response.version > 0 => {
            println!("{} (version {})", response.status, response.version);
        }
        _ => println!("{}", response.status),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = KvClient::connect(cli.coordinator)
        .await?
        .with_retries(cli.retries)
        .with_timeout(cli.timeout);

    let response = match cli.command {
        Commands::Put { key, value } => {
            client
                .put(Key::from(key.as_str()), value.into_bytes())
                .await?
        }
        Commands::Get { key } => client.get(Key::from(key.as_str())).await?,
        Commands::Remove { key } => client.remove(Key::from(key.as_str())).await?,
        Commands::Shutdown => client.shutdown().await?,
    };

    print_response(&response);
    if response.status != Status::Successful {
        std::process::exit(1);
    }
    Ok(())
}
