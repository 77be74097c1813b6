//! Client-side view of the match: which snapshots to accept, whether the
//! match is over, and what just happened to the local player.

use log::info;
use shared::PlayerSnapshot;

/// A snapshot tick this far behind the watermark means the server restarted.
pub const RESTART_THRESHOLD: u32 = 200;

/// Notable changes to the local player between two accepted snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    BoostUsed,
    OrbCollected { score: u32 },
}

#[derive(Debug, Default)]
pub struct LocalPlayerTracker {
    last_score: Option<u32>,
    last_boost_active: bool,
}

impl LocalPlayerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares the local player's latest snapshot with the previous one.
    pub fn observe(&mut self, snapshot: &PlayerSnapshot) -> Vec<LocalEvent> {
        let mut events = Vec::new();

        if snapshot.boost_active && !self.last_boost_active {
            events.push(LocalEvent::BoostUsed);
        }
        if let Some(last) = self.last_score {
            if snapshot.score > last {
                events.push(LocalEvent::OrbCollected {
                    score: snapshot.score,
                });
            }
        }

        self.last_score = Some(snapshot.score);
        self.last_boost_active = snapshot.boost_active;
        events
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Match status and snapshot ordering for one client.
#[derive(Debug)]
pub struct Session {
    local_id: String,
    last_tick: Option<u32>,
    game_over: bool,
    won: bool,
    winner: Option<String>,
    tracker: LocalPlayerTracker,
}

impl Session {
    pub fn new(local_id: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            last_tick: None,
            game_over: false,
            won: false,
            winner: None,
            tracker: LocalPlayerTracker::new(),
        }
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    pub fn won(&self) -> bool {
        self.won
    }

    pub fn winner(&self) -> Option<&str> {
        self.winner.as_deref()
    }

    pub fn last_tick(&self) -> Option<u32> {
        self.last_tick
    }

    /// Decides whether a `State` with this tick should be applied, and
    /// advances the watermark when it is.
    pub fn accept_tick(&mut self, tick: u32) -> bool {
        let accept = match self.last_tick {
            None => true,
            Some(last) if tick > last => true,
            Some(last) => last - tick > RESTART_THRESHOLD,
        };
        if accept {
            self.last_tick = Some(tick);
        }
        accept
    }

    /// Runs local player event detection over an accepted snapshot.
    pub fn observe_players(&mut self, players: &[PlayerSnapshot]) -> Vec<LocalEvent> {
        let Some(local) = players.iter().find(|p| p.id == self.local_id) else {
            return Vec::new();
        };

        let events = self.tracker.observe(local);
        for event in &events {
            match event {
                LocalEvent::BoostUsed => info!("Boost used"),
                LocalEvent::OrbCollected { score } => info!("Orb collected, score {}", score),
            }
        }
        events
    }

    pub fn game_over(&mut self, winner_id: &str) {
        self.game_over = true;
        self.won = winner_id == self.local_id;
        self.winner = Some(winner_id.to_string());

        if self.won {
            info!("Game over: you won!");
        } else {
            info!("Game over: {} won", winner_id);
        }
    }

    /// Clears all per-match state for a new match.
    pub fn reset(&mut self) {
        self.last_tick = None;
        self.game_over = false;
        self.won = false;
        self.winner = None;
        self.tracker.reset();
    }
}
