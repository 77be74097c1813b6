//! Server configuration, assembled by the binary from command line arguments.

use shared::{DEFAULT_PORT, INITIAL_ORB_COUNT, TICK_MILLIS, WORLD_HEIGHT, WORLD_MARGIN, WORLD_WIDTH};
use std::time::Duration;

pub use shared::ChaosConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub world_width: f32,
    pub world_height: f32,
    pub tick_duration: Duration,
    pub orb_count: usize,
    pub max_clients: usize,
    pub client_timeout: Duration,
    /// Score that ends the match; None plays forever.
    pub score_to_win: Option<u32>,
    pub intermission: Duration,
    pub observe: bool,
    pub chaos: Option<ChaosConfig>,
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", DEFAULT_PORT),
            world_width: WORLD_WIDTH,
            world_height: WORLD_HEIGHT,
            tick_duration: Duration::from_millis(TICK_MILLIS),
            orb_count: INITIAL_ORB_COUNT,
            max_clients: 32,
            client_timeout: Duration::from_secs(5),
            score_to_win: None,
            intermission: Duration::from_secs(3),
            observe: false,
            chaos: None,
            seed: None,
        }
    }
}

impl ServerConfig {
    /// Fixed simulation step in seconds.
    pub fn tick_dt(&self) -> f32 {
        self.tick_duration.as_secs_f32()
    }

    /// Number of ticks that span roughly one second.
    pub fn ticks_per_second(&self) -> u32 {
        let millis = self.tick_duration.as_millis().max(1) as u32;
        (1000 / millis).max(1)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.world_width <= 2.0 * WORLD_MARGIN || self.world_height <= 2.0 * WORLD_MARGIN {
            return Err(format!(
                "world {}x{} is smaller than the {} unit margin on each side",
                self.world_width, self.world_height, WORLD_MARGIN
            ));
        }
        if self.tick_duration.is_zero() {
            return Err("tick duration must be positive".to_string());
        }
        if self.max_clients == 0 {
            return Err("max clients must be at least 1".to_string());
        }
        if self.score_to_win == Some(0) {
            return Err("score to win must be at least 1".to_string());
        }
        Ok(())
    }
}
