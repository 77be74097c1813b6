use clap::Parser;
use log::info;
use server::config::{ChaosConfig, ServerConfig};
use server::network::Server;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "9050")]
    port: u16,

    /// Milliseconds per simulation tick
    #[arg(short, long, default_value = "25")]
    tick_ms: u64,

    /// Arena width in world units
    #[arg(long, default_value = "800")]
    width: f32,

    /// Arena height in world units
    #[arg(long, default_value = "600")]
    height: f32,

    /// Number of orbs kept alive in the arena
    #[arg(long, default_value = "6")]
    orbs: usize,

    /// Maximum number of connected peers
    #[arg(short, long, default_value = "32")]
    max_clients: usize,

    /// Seconds of silence before a peer is dropped
    #[arg(long, default_value = "5")]
    timeout_secs: u64,

    /// End the match when a player reaches this score
    #[arg(long)]
    score_to_win: Option<u32>,

    /// Seconds between game over and the next match
    #[arg(long, default_value = "3")]
    intermission_secs: u64,

    /// Log observer mirror events at debug level
    #[arg(long)]
    observe: bool,

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

    /// Seed for orb placement and chaos decisions
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let chaos = self.chaos_secs.map(|secs| ChaosConfig {
            duration: Duration::from_secs(secs),
            latency_ms: self.chaos_latency_ms,
            jitter_ms: self.chaos_jitter_ms,
            loss: self.chaos_loss,
        });

        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            world_width: self.width,
            world_height: self.height,
            tick_duration: Duration::from_millis(self.tick_ms),
            orb_count: self.orbs,
            max_clients: self.max_clients,
            client_timeout: Duration::from_secs(self.timeout_secs),
            score_to_win: self.score_to_win,
            intermission: Duration::from_secs(self.intermission_secs),
            observe: self.observe,
            chaos,
            seed: self.seed,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = Args::parse().into_config();
    info!(
        "Starting server: {}x{} arena, {} orbs, {:?} ticks",
        config.world_width, config.world_height, config.orb_count, config.tick_duration
    );

    let mut server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
