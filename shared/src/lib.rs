use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

pub mod chaos;

pub use chaos::{ChaosConfig, ChaosInjector, ChaosStatus, Delivery};

pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 600.0;
pub const WORLD_MARGIN: f32 = 20.0;
pub const PLAYER_SPEED: f32 = 160.0;
pub const BOOST_MULTIPLIER: f32 = 2.2;
pub const BOOST_DURATION_SECS: f64 = 0.6;
pub const COLLECT_RADIUS: f32 = 20.0;
pub const ORB_SPAWN_MARGIN: f32 = 40.0;
pub const INITIAL_ORB_COUNT: usize = 6;
pub const TICK_MILLIS: u64 = 25;
pub const INTENT_EPSILON: f32 = 0.0001;
pub const MAX_DATAGRAM_SIZE: usize = 4096;
pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_PORT: u16 = 9050;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("failed to encode packet: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode datagram: {0}")]
    Decode(#[source] bincode::Error),
    #[error("datagram of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },
}

/// Every datagram exchanged between client and server. The variant tag is the
/// envelope discriminator on the wire.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Input {
        id: String,
        dx: f32,
        dy: f32,
        boost: bool,
    },
    Disconnect,

    Connected {
        peer_id: u32,
    },
    State {
        tick: u32,
        players: Vec<PlayerSnapshot>,
        orbs: Vec<OrbSnapshot>,
    },
    GameOver {
        winner_id: String,
    },
    Reset,
    Disconnected {
        reason: String,
    },
}

impl Packet {
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Connect { .. } => "connect",
            Packet::Input { .. } => "input",
            Packet::Disconnect => "disconnect",
            Packet::Connected { .. } => "connected",
            Packet::State { .. } => "state",
            Packet::GameOver { .. } => "game_over",
            Packet::Reset => "reset",
            Packet::Disconnected { .. } => "disconnected",
        }
    }
}

/// Wire projection of one player.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    pub score: u32,
    pub boost_charges: u32,
    pub boost_active: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OrbSnapshot {
    pub id: String,
    pub x: f32,
    pub y: f32,
}

pub fn encode(packet: &Packet) -> Result<Vec<u8>, WireError> {
    let data = bincode::serialize(packet).map_err(WireError::Encode)?;
    if data.len() > MAX_DATAGRAM_SIZE {
        return Err(WireError::Oversized {
            len: data.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    Ok(data)
}

pub fn decode(data: &[u8]) -> Result<Packet, WireError> {
    if data.len() > MAX_DATAGRAM_SIZE {
        return Err(WireError::Oversized {
            len: data.len(),
            max: MAX_DATAGRAM_SIZE,
        });
    }
    bincode::deserialize(data).map_err(WireError::Decode)
}

/// Wraps an angle difference into `(-PI, PI]` so blending takes the short way round.
pub fn normalize_angle_delta(delta: f32) -> f32 {
    let mut d = delta % (2.0 * PI);
    if d > PI {
        d -= 2.0 * PI;
    } else if d <= -PI {
        d += 2.0 * PI;
    }
    d
}

/// Scales `(dx, dy)` to unit length, or returns the zero vector when the
/// magnitude is negligible.
pub fn normalize_intent(dx: f32, dy: f32) -> (f32, f32) {
    let len = (dx * dx + dy * dy).sqrt();
    if len.is_finite() && len > INTENT_EPSILON {
        (dx / len, dy / len)
    } else {
        (0.0, 0.0)
    }
}
