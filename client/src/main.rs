use clap::Parser;
use client::network::{Client, ClientConfig};
use log::info;
use rand::Rng;
use shared::ChaosConfig;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:9050")]
    server: String,

    /// Player id to play as (random if omitted)
    #[arg(short, long)]
    id: Option<String>,

    /// Seconds to play before disconnecting (0 runs until Ctrl+C)
    #[arg(short, long, default_value = "0")]
    duration_secs: u64,

    /// Seconds between progress reports
    #[arg(short, long, default_value = "2")]
    report_secs: u64,

    /// Enable network chaos for this many seconds at startup
    #[arg(long)]
    chaos_secs: Option<u64>,

    /// Chaos base latency in milliseconds
    #[arg(long, default_value = "120")]
    chaos_latency_ms: i64,

    /// Chaos jitter in milliseconds (+/-)
    #[arg(long, default_value = "40")]
    chaos_jitter_ms: i64,

    /// Chaos packet loss probability (0..1)
    #[arg(long, default_value = "0.3")]
    chaos_loss: f64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let player_id = args
        .id
        .unwrap_or_else(|| format!("pilot-{:04}", rand::thread_rng().gen_range(0..10_000)));

    let mut config = ClientConfig::new(args.server, player_id);
    config.report_interval = Duration::from_secs(args.report_secs.max(1));
    config.chaos = args.chaos_secs.map(|secs| ChaosConfig {
        duration: Duration::from_secs(secs),
        latency_ms: args.chaos_latency_ms,
        jitter_ms: args.chaos_jitter_ms,
        loss: args.chaos_loss,
    });

    info!("Starting client...");
    info!("Connecting to: {}", config.server_addr);
    info!("Playing as: {}", config.player_id);

    let mut client = Client::new(config).await?;

    if args.duration_secs > 0 {
        client
            .run_until(tokio::time::sleep(Duration::from_secs(args.duration_secs)))
            .await?;
    } else {
        client.run().await?;
    }

    Ok(())
}
