//! Fixed-timestep authoritative simulation.
//!
//! The engine is the only writer of player and orb state. Input application only
//! touches the intent fields of a player; boost, movement and orb collection are
//! resolved inside [`SimulationEngine::tick`].

use crate::world::{Orb, SimPlayer, WorldState};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    normalize_intent, BOOST_DURATION_SECS, BOOST_MULTIPLIER, COLLECT_RADIUS, ORB_SPAWN_MARGIN,
    WORLD_MARGIN,
};
use std::collections::HashMap;

/// Result of recording one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    Created,
    Updated,
    Ignored,
}

/// One orb pickup resolved during a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub player_id: String,
    pub orb_id: String,
    pub spawned_orb_id: String,
}

pub struct SimulationEngine {
    world: WorldState,
    /// player id -> index into `world.players`
    index: HashMap<String, usize>,
    orb_count: usize,
    next_registration: u64,
    next_orb: u64,
    sim_time: f64,
    tick: u32,
    rng: StdRng,
}

impl SimulationEngine {
    pub fn new(width: f32, height: f32, orb_count: usize) -> Self {
        Self::with_rng(width, height, orb_count, StdRng::from_entropy())
    }

    pub fn with_seed(width: f32, height: f32, orb_count: usize, seed: u64) -> Self {
        Self::with_rng(width, height, orb_count, StdRng::seed_from_u64(seed))
    }

    fn with_rng(width: f32, height: f32, orb_count: usize, rng: StdRng) -> Self {
        let mut engine = Self {
            world: WorldState::new(width, height),
            index: HashMap::new(),
            orb_count,
            next_registration: 0,
            next_orb: 0,
            sim_time: 0.0,
            tick: 0,
            rng,
        };
        engine.respawn_orbs();
        engine
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn tick_count(&self) -> u32 {
        self.tick
    }

    /// Seconds of simulated time since the engine started.
    pub fn sim_time(&self) -> f64 {
        self.sim_time
    }

    pub fn player_count(&self) -> usize {
        self.world.players.len()
    }

    /// Records the latest intent for `player_id`, creating the player at the
    /// world centre on first sight.
    pub fn apply_input(&mut self, player_id: &str, dx: f32, dy: f32, boost: bool) -> InputOutcome {
        if player_id.trim().is_empty() {
            return InputOutcome::Ignored;
        }

        let (outcome, idx) = match self.index.get(player_id) {
            Some(&idx) => (InputOutcome::Updated, idx),
            None => (InputOutcome::Created, self.add_player(player_id)),
        };

        let (ndx, ndy) = normalize_intent(dx, dy);
        let player = &mut self.world.players[idx];
        player.input_dx = ndx;
        player.input_dy = ndy;
        if boost {
            player.consume_boost = true;
        }

        outcome
    }

    fn add_player(&mut self, player_id: &str) -> usize {
        let (cx, cy) = self.world.center();
        let player = SimPlayer::new(player_id.to_string(), self.next_registration, cx, cy);
        self.next_registration += 1;

        info!("Created player {} at ({}, {})", player_id, cx, cy);
        self.world.players.push(player);
        let idx = self.world.players.len() - 1;
        self.index.insert(player_id.to_string(), idx);
        idx
    }

    pub fn remove_player(&mut self, player_id: &str) -> bool {
        let Some(idx) = self.index.remove(player_id) else {
            return false;
        };
        // Vec::remove keeps the remaining players in registration order.
        self.world.players.remove(idx);
        self.rebuild_index();
        info!("Removed player {}", player_id);
        true
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .world
            .players
            .iter()
            .enumerate()
            .map(|(idx, p)| (p.id.clone(), idx))
            .collect();
    }

    /// Advances the world by one fixed step of `dt` seconds.
    pub fn tick(&mut self, dt: f32) -> Vec<Collection> {
        let now = self.sim_time;
        let (width, height) = (self.world.width, self.world.height);

        for player in &mut self.world.players {
            resolve_boost(player, now);
            move_player(player, dt, width, height);
        }

        let collections = self.collect_orbs();

        self.sim_time += dt as f64;
        self.tick = self.tick.wrapping_add(1);
        collections
    }

    fn collect_orbs(&mut self) -> Vec<Collection> {
        let radius_sq = COLLECT_RADIUS * COLLECT_RADIUS;
        let mut collections = Vec::new();

        for i in 0..self.world.orbs.len() {
            let (ox, oy) = (self.world.orbs[i].x, self.world.orbs[i].y);

            // First qualifying player in registration order wins the orb.
            let collector = self.world.players.iter_mut().find(|p| {
                let dx = p.x - ox;
                let dy = p.y - oy;
                dx * dx + dy * dy <= radius_sq
            });

            let Some(player) = collector else {
                continue;
            };
            player.score += 1;
            player.boost_charges = 1;
            let player_id = player.id.clone();

            let replacement = self.spawn_orb();
            let spawned_orb_id = replacement.id.clone();
            let collected = std::mem::replace(&mut self.world.orbs[i], replacement);

            collections.push(Collection {
                player_id,
                orb_id: collected.id,
                spawned_orb_id,
            });
        }

        collections
    }

    fn spawn_orb(&mut self) -> Orb {
        let id = format!("orb_{:04}", self.next_orb);
        self.next_orb += 1;

        let x = random_coordinate(&mut self.rng, self.world.width);
        let y = random_coordinate(&mut self.rng, self.world.height);
        Orb { id, x, y }
    }

    fn respawn_orbs(&mut self) {
        self.world.orbs.clear();
        for _ in 0..self.orb_count {
            let orb = self.spawn_orb();
            self.world.orbs.push(orb);
        }
    }

    /// First player, in registration order, whose score reached `target`.
    pub fn winner(&self, target: u32) -> Option<&str> {
        self.world
            .players
            .iter()
            .find(|p| p.score >= target)
            .map(|p| p.id.as_str())
    }

    /// Starts a fresh match: players stay connected but return to the centre with
    /// no score, charges or boost, and the orb pool is rebuilt.
    pub fn reset_match(&mut self) {
        let (cx, cy) = self.world.center();
        for player in &mut self.world.players {
            player.x = cx;
            player.y = cy;
            player.score = 0;
            player.boost_charges = 0;
            player.boost_active = false;
            player.boost_until = 0.0;
            player.consume_boost = false;
        }
        self.respawn_orbs();
        info!(
            "Match reset with {} players and {} orbs",
            self.world.players.len(),
            self.world.orbs.len()
        );
    }
}

fn resolve_boost(player: &mut SimPlayer, now: f64) {
    if player.consume_boost && player.boost_charges > 0 && !player.boost_active {
        player.boost_active = true;
        player.boost_charges -= 1;
        player.boost_until = now + BOOST_DURATION_SECS;
    }
    player.consume_boost = false;

    if player.boost_active && now >= player.boost_until {
        player.boost_active = false;
    }
}

fn move_player(player: &mut SimPlayer, dt: f32, width: f32, height: f32) {
    let (ndx, ndy) = normalize_intent(player.input_dx, player.input_dy);
    if ndx != 0.0 || ndy != 0.0 {
        player.angle = ndy.atan2(ndx);
    }

    let speed = if player.boost_active {
        player.speed * BOOST_MULTIPLIER
    } else {
        player.speed
    };

    player.x = (player.x + ndx * speed * dt)
        .max(WORLD_MARGIN)
        .min(width - WORLD_MARGIN);
    player.y = (player.y + ndy * speed * dt)
        .max(WORLD_MARGIN)
        .min(height - WORLD_MARGIN);
}

fn random_coordinate(rng: &mut StdRng, extent: f32) -> f32 {
    let (lo, hi) = (ORB_SPAWN_MARGIN, extent - ORB_SPAWN_MARGIN);
    if lo < hi {
        rng.gen_range(lo..hi)
    } else {
        extent * 0.5
    }
}
