//! Authoritative world data. Plain state with no simulation behaviour.

use shared::{OrbSnapshot, PlayerSnapshot, PLAYER_SPEED};

/// Server-side player record.
#[derive(Debug, Clone)]
pub struct SimPlayer {
    pub id: String,
    /// Position in the registration order, used as the orb tie-break.
    pub registration: u64,
    pub x: f32,
    pub y: f32,
    /// Radians, from the last non-zero movement intent.
    pub angle: f32,
    pub speed: f32,
    pub score: u32,
    pub boost_charges: u32,
    pub boost_active: bool,
    /// Simulation time (seconds) at which the active boost ends.
    pub boost_until: f64,
    /// Unit-length intent or the zero vector.
    pub input_dx: f32,
    pub input_dy: f32,
    /// Boost requested since the last tick; resolved once then cleared.
    pub consume_boost: bool,
}

impl SimPlayer {
    pub fn new(id: String, registration: u64, x: f32, y: f32) -> Self {
        Self {
            id,
            registration,
            x,
            y,
            angle: 0.0,
            speed: PLAYER_SPEED,
            score: 0,
            boost_charges: 0,
            boost_active: false,
            boost_until: 0.0,
            input_dx: 0.0,
            input_dy: 0.0,
            consume_boost: false,
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id.clone(),
            x: self.x,
            y: self.y,
            angle: self.angle,
            score: self.score,
            boost_charges: self.boost_charges,
            boost_active: self.boost_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Orb {
    pub id: String,
    pub x: f32,
    pub y: f32,
}

impl Orb {
    pub fn snapshot(&self) -> OrbSnapshot {
        OrbSnapshot {
            id: self.id.clone(),
            x: self.x,
            y: self.y,
        }
    }
}

/// Players are kept in registration order; that order is the documented
/// iteration order for orb collection.
#[derive(Debug, Clone)]
pub struct WorldState {
    pub width: f32,
    pub height: f32,
    pub players: Vec<SimPlayer>,
    pub orbs: Vec<Orb>,
}

impl WorldState {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            players: Vec::new(),
            orbs: Vec::new(),
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.width * 0.5, self.height * 0.5)
    }

    pub fn player(&self, id: &str) -> Option<&SimPlayer> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_snapshots(&self) -> Vec<PlayerSnapshot> {
        self.players.iter().map(SimPlayer::snapshot).collect()
    }

    pub fn orb_snapshots(&self) -> Vec<OrbSnapshot> {
        self.orbs.iter().map(Orb::snapshot).collect()
    }
}
