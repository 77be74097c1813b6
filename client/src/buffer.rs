//! Per-entity snapshot history and interpolation
//!
//! Snapshots arrive at the server tick rate and may be lost, delayed or
//! reordered. The buffer keeps the two most recent observations of every
//! remote player and blends between them over a fixed window, so a consumer
//! polling at a higher rate sees continuous motion instead of 25 ms steps.
//!
//! Ingest and query share one lock: queries advance particle effects and so
//! mutate the history too.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{normalize_angle_delta, OrbSnapshot, PlayerSnapshot};
use std::collections::HashMap;
use std::f32::consts::TAU;

/// Seconds over which a new observation is blended in.
pub const INTERPOLATION_WINDOW: f64 = 0.10;
/// Seconds a score increase stays highlighted.
pub const PULSE_DURATION: f64 = 0.25;
/// Particles spawned on a score increase.
pub const BURST_PARTICLES: usize = 20;
pub const PARTICLE_SPEED_MIN: f32 = 80.0;
pub const PARTICLE_SPEED_MAX: f32 = 200.0;
pub const PARTICLE_LIFE_MIN: f32 = 0.3;
pub const PARTICLE_LIFE_MAX: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub x: f32,
    pub y: f32,
    pub vx: f32,
    pub vy: f32,
    pub life: f32,
}

impl Particle {
    fn advance(&mut self, dt: f32) {
        self.x += self.vx * dt;
        self.y += self.vy * dt;
        self.life -= dt;
    }
}

/// What a consumer gets back for one entity at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedEntity {
    pub id: String,
    pub pose: Pose,
    pub score: u32,
    pub boost_charges: u32,
    pub boost_active: bool,
    pub pulse: bool,
    pub particles: Vec<Particle>,
}

#[derive(Debug, Clone)]
struct EntityHistory {
    previous: Pose,
    current: Pose,
    arrival: f64,
    score: u32,
    boost_charges: u32,
    boost_active: bool,
    particles: Vec<Particle>,
    pulse_until: f64,
    // Time up to which particles have been advanced
    advanced_to: f64,
}

impl EntityHistory {
    fn new(snapshot: &PlayerSnapshot, arrival: f64) -> Self {
        let pose = pose_of(snapshot);
        Self {
            previous: pose,
            current: pose,
            arrival,
            score: snapshot.score,
            boost_charges: snapshot.boost_charges,
            boost_active: snapshot.boost_active,
            particles: Vec::new(),
            pulse_until: f64::NEG_INFINITY,
            advanced_to: arrival,
        }
    }

    fn blend(&self, now: f64) -> Pose {
        let t = ((now - self.arrival) / INTERPOLATION_WINDOW).clamp(0.0, 1.0) as f32;
        let (prev, cur) = (self.previous, self.current);
        Pose {
            x: prev.x + (cur.x - prev.x) * t,
            y: prev.y + (cur.y - prev.y) * t,
            angle: prev.angle + normalize_angle_delta(cur.angle - prev.angle) * t,
        }
    }

    fn view(&mut self, id: &str, now: f64) -> InterpolatedEntity {
        self.advance_particles(now);
        InterpolatedEntity {
            id: id.to_string(),
            pose: self.blend(now),
            score: self.score,
            boost_charges: self.boost_charges,
            boost_active: self.boost_active,
            pulse: now < self.pulse_until,
            particles: self.particles.clone(),
        }
    }

    fn advance_particles(&mut self, now: f64) {
        let dt = (now - self.advanced_to).max(0.0) as f32;
        if now > self.advanced_to {
            self.advanced_to = now;
        }
        if dt > 0.0 {
            for particle in &mut self.particles {
                particle.advance(dt);
            }
        }
        self.particles.retain(|p| p.life > 0.0);
    }
}

fn pose_of(snapshot: &PlayerSnapshot) -> Pose {
    Pose {
        x: snapshot.x,
        y: snapshot.y,
        angle: snapshot.angle,
    }
}

struct BufferInner {
    entities: HashMap<String, EntityHistory>,
    orbs: Vec<OrbSnapshot>,
    rng: StdRng,
}

impl BufferInner {
    fn ingest(&mut self, snapshot: &PlayerSnapshot, arrival: f64) -> bool {
        if !self.entities.contains_key(&snapshot.id) {
            self.entities
                .insert(snapshot.id.clone(), EntityHistory::new(snapshot, arrival));
            return true;
        }
        let Some(history) = self.entities.get_mut(&snapshot.id) else {
            return false;
        };

        if arrival <= history.arrival {
            return false;
        }

        history.advance_particles(arrival);
        if snapshot.score > history.score {
            history.pulse_until = arrival + PULSE_DURATION;
            history
                .particles
                .extend(spawn_burst(&mut self.rng, snapshot.x, snapshot.y));
        }

        history.previous = history.current;
        history.current = pose_of(snapshot);
        history.arrival = arrival;
        history.score = snapshot.score;
        history.boost_charges = snapshot.boost_charges;
        history.boost_active = snapshot.boost_active;
        true
    }
}

fn spawn_burst(rng: &mut StdRng, x: f32, y: f32) -> Vec<Particle> {
    (0..BURST_PARTICLES)
        .map(|_| {
            let direction = rng.gen_range(0.0..TAU);
            let speed = rng.gen_range(PARTICLE_SPEED_MIN..PARTICLE_SPEED_MAX);
            Particle {
                x,
                y,
                vx: direction.cos() * speed,
                vy: direction.sin() * speed,
                life: rng.gen_range(PARTICLE_LIFE_MIN..PARTICLE_LIFE_MAX),
            }
        })
        .collect()
}

/// Thread-safe store of what the client has seen of every remote player.
pub struct ClientStateBuffer {
    inner: Mutex<BufferInner>,
}

impl ClientStateBuffer {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                entities: HashMap::new(),
                orbs: Vec::new(),
                rng,
            }),
        }
    }

    /// Records one observation of an entity.
    ///
    /// Returns false when the observation is not newer than the stored one
    /// and was ignored.
    pub fn ingest(&self, snapshot: &PlayerSnapshot, arrival: f64) -> bool {
        self.inner.lock().ingest(snapshot, arrival)
    }

    /// Ingests every player of a snapshot and replaces the orb list, all under
    /// one lock so queries never see half a snapshot.
    pub fn ingest_snapshot(&self, players: &[PlayerSnapshot], orbs: &[OrbSnapshot], arrival: f64) {
        let mut inner = self.inner.lock();
        for player in players {
            inner.ingest(player, arrival);
        }

        inner
            .entities
            .retain(|id, _| players.iter().any(|p| p.id == *id));
        inner.orbs = orbs.to_vec();
    }

    /// Smoothed view of one entity at `now`. Advances its particles.
    pub fn query(&self, id: &str, now: f64) -> Option<InterpolatedEntity> {
        let mut inner = self.inner.lock();
        let history = inner.entities.get_mut(id)?;
        Some(history.view(id, now))
    }

    /// Queries every known entity, ordered by id.
    pub fn query_all(&self, now: f64) -> Vec<InterpolatedEntity> {
        let mut inner = self.inner.lock();
        let mut view: Vec<InterpolatedEntity> = inner
            .entities
            .iter_mut()
            .map(|(id, history)| history.view(id, now))
            .collect();
        view.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        view
    }

    pub fn orbs(&self) -> Vec<OrbSnapshot> {
        self.inner.lock().orbs.clone()
    }

    /// Latest observed (not interpolated) pose of an entity.
    pub fn latest_pose(&self, id: &str) -> Option<Pose> {
        self.inner.lock().entities.get(id).map(|h| h.current)
    }

    /// Forgets every entity and orb.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.entities.clear();
        inner.orbs.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entities.is_empty()
    }
}

impl Default for ClientStateBuffer {
    fn default() -> Self {
        Self::new()
    }
}
