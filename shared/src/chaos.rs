//! Network-condition injector for exercising the protocol under loss, latency
//! and jitter.
//!
//! The injector never touches a socket itself. Send and receive paths ask it for
//! a [`Delivery`] verdict per datagram and act on it: drop the datagram, forward
//! it immediately, or forward it after an artificial delay. Activation is a
//! time-bounded window, so expiry needs no background timer.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

/// Longest chaos window; longer requests are capped to it.
pub const MAX_WINDOW: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// What to do with one datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Drop,
    Now,
    After(Duration),
}

/// Point-in-time view of the injector, suitable for logging or an observer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChaosStatus {
    pub active: bool,
    pub remaining_ms: u64,
    pub latency_ms: u64,
    pub jitter_ms: u64,
    pub loss: f64,
}

/// Parameters for one chaos window, as given on the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosConfig {
    pub duration: Duration,
    pub latency_ms: i64,
    pub jitter_ms: i64,
    pub loss: f64,
}

impl ChaosConfig {
    pub fn apply(&self, injector: &ChaosInjector) {
        injector.trigger(self.duration, self.latency_ms, self.jitter_ms, self.loss);
    }
}

#[derive(Debug)]
struct ChaosState {
    until: Option<Instant>,
    latency_ms: u64,
    jitter_ms: u64,
    loss: f64,
    rng: StdRng,
}

impl ChaosState {
    fn is_active_at(&self, now: Instant) -> bool {
        self.until.map_or(false, |until| now < until)
    }

    fn should_drop_at(&mut self, now: Instant) -> bool {
        if !self.is_active_at(now) {
            return false;
        }
        let loss = self.loss;
        self.rng.gen_bool(loss)
    }

    fn delay_ms_at(&mut self, now: Instant) -> u64 {
        if !self.is_active_at(now) {
            return 0;
        }
        let jitter = self.jitter_ms as i64;
        let offset = self.rng.gen_range(-jitter..=jitter);
        (self.latency_ms as i64).saturating_add(offset).max(0) as u64
    }
}

/// Shared degraded-network switch.
///
/// All access goes through one small lock that is independent of any simulation
/// lock, so status queries from one task and triggers from another are safe.
#[derive(Debug)]
pub struct ChaosInjector {
    state: Mutex<ChaosState>,
}

impl ChaosInjector {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            state: Mutex::new(ChaosState {
                until: None,
                latency_ms: 0,
                jitter_ms: 0,
                loss: 0.0,
                rng,
            }),
        }
    }

    /// Activates chaos mode for `duration`, replacing any previous parameters.
    pub fn trigger(&self, duration: Duration, latency_ms: i64, jitter_ms: i64, loss: f64) {
        self.trigger_at(Instant::now(), duration, latency_ms, jitter_ms, loss);
    }

    pub fn trigger_at(
        &self,
        now: Instant,
        duration: Duration,
        latency_ms: i64,
        jitter_ms: i64,
        loss: f64,
    ) {
        let mut state = self.state.lock();
        state.latency_ms = latency_ms.max(0) as u64;
        state.jitter_ms = jitter_ms.max(0) as u64;
        state.loss = if loss.is_nan() { 0.0 } else { loss.clamp(0.0, 1.0) };
        state.until = now.checked_add(duration.min(MAX_WINDOW));
    }

    pub fn clear(&self) {
        self.state.lock().until = None;
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Instant::now())
    }

    pub fn is_active_at(&self, now: Instant) -> bool {
        self.state.lock().is_active_at(now)
    }

    pub fn should_drop(&self) -> bool {
        self.should_drop_at(Instant::now())
    }

    pub fn should_drop_at(&self, now: Instant) -> bool {
        self.state.lock().should_drop_at(now)
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms_at(Instant::now())
    }

    /// `max(0, latency + uniform(-jitter, +jitter))` while active, else 0.
    pub fn delay_ms_at(&self, now: Instant) -> u64 {
        self.state.lock().delay_ms_at(now)
    }

    pub fn verdict(&self) -> Delivery {
        self.verdict_at(Instant::now())
    }

    /// Drop and delay decided under one lock, so a concurrent trigger or clear
    /// cannot split the decision across two activations.
    pub fn verdict_at(&self, now: Instant) -> Delivery {
        let mut state = self.state.lock();
        if state.should_drop_at(now) {
            return Delivery::Drop;
        }
        match state.delay_ms_at(now) {
            0 => Delivery::Now,
            ms => Delivery::After(Duration::from_millis(ms)),
        }
    }

    pub fn status(&self) -> ChaosStatus {
        self.status_at(Instant::now())
    }

    pub fn status_at(&self, now: Instant) -> ChaosStatus {
        let state = self.state.lock();
        let active = state.is_active_at(now);
        let remaining_ms = match state.until {
            Some(until) if active => until.duration_since(now).as_millis() as u64,
            _ => 0,
        };
        ChaosStatus {
            active,
            remaining_ms,
            latency_ms: state.latency_ms,
            jitter_ms: state.jitter_ms,
            loss: state.loss,
        }
    }
}

impl Default for ChaosInjector {
    fn default() -> Self {
        Self::new()
    }
}
