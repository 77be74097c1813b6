//! Client intent sampling and send-rate limiting

use crate::buffer::Pose;
use shared::{normalize_intent, OrbSnapshot, TICK_MILLIS};
use std::time::{Duration, Instant};

/// One sampled movement intent.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Intent {
    pub dx: f32,
    pub dy: f32,
    pub boost: bool,
}

/// Anything that can be polled for the local player's intent.
pub trait IntentSource {
    fn sample(&mut self, view: &PilotView<'_>) -> Intent;
}

/// What an intent source may look at when deciding.
#[derive(Debug, Clone, Copy)]
pub struct PilotView<'a> {
    pub pose: Option<Pose>,
    pub boost_charges: u32,
    pub orbs: &'a [OrbSnapshot],
}

/// Steers toward the nearest orb and boosts whenever it holds a charge.
#[derive(Debug, Default)]
pub struct OrbPilot;

impl IntentSource for OrbPilot {
    fn sample(&mut self, view: &PilotView<'_>) -> Intent {
        let Some(pose) = view.pose else {
            return Intent::default();
        };

        let nearest = view.orbs.iter().min_by(|a, b| {
            let da = (a.x - pose.x).powi(2) + (a.y - pose.y).powi(2);
            let db = (b.x - pose.x).powi(2) + (b.y - pose.y).powi(2);
            da.total_cmp(&db)
        });

        match nearest {
            Some(orb) => {
                let (dx, dy) = normalize_intent(orb.x - pose.x, orb.y - pose.y);
                Intent {
                    dx,
                    dy,
                    boost: view.boost_charges > 0,
                }
            }
            None => Intent::default(),
        }
    }
}

/// Caps outgoing inputs to one per send interval.
///
/// A boost request seen between sends is latched so it still reaches the
/// server with the next input.
pub struct InputThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
    boost_latched: bool,
}

impl InputThrottle {
    pub fn new() -> Self {
        Self::with_interval(Duration::from_millis(TICK_MILLIS))
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            boost_latched: false,
        }
    }

    pub fn offer(&mut self, intent: Intent) -> Option<Intent> {
        self.offer_at(intent, Instant::now())
    }

    /// Returns the intent to send now, or None if the last send was too recent.
    pub fn offer_at(&mut self, intent: Intent, now: Instant) -> Option<Intent> {
        self.boost_latched |= intent.boost;

        let due = self
            .last_sent
            .map_or(true, |last| now.duration_since(last) >= self.interval);
        if !due {
            return None;
        }

        self.last_sent = Some(now);
        let boost = std::mem::take(&mut self.boost_latched);
        Some(Intent { boost, ..intent })
    }
}

impl Default for InputThrottle {
    fn default() -> Self {
        Self::new()
    }
}
