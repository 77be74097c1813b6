//! Outbound state fan-out.
//!
//! Two output ports with different guarantees:
//! - [`StateBroadcaster`] sends every tick's full snapshot to every connected
//!   peer, changed or not.
//! - [`ObserverMirror`] forwards a snapshot to the external observer only when its
//!   content differs from the previous emission.

use crate::network::GameMessage;
use crate::world::WorldState;
use log::{debug, error};
use shared::{encode, OrbSnapshot, Packet, PlayerSnapshot};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// Builds the wire snapshot for the current world.
pub fn state_packet(tick: u32, world: &WorldState) -> Packet {
    Packet::State {
        tick,
        players: world.player_snapshots(),
        orbs: world.orb_snapshots(),
    }
}

/// Encodes packets once and queues them for the network sender task.
pub struct StateBroadcaster {
    outbox: mpsc::UnboundedSender<GameMessage>,
    published: u64,
}

impl StateBroadcaster {
    pub fn new(outbox: mpsc::UnboundedSender<GameMessage>) -> Self {
        Self {
            outbox,
            published: 0,
        }
    }

    /// Number of snapshots handed to the sender so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Queues `packet` for every target. Returns false when nothing was queued.
    pub fn broadcast(&self, packet: &Packet, targets: Vec<(u32, SocketAddr)>) -> bool {
        if targets.is_empty() {
            return false;
        }

        let data = match encode(packet) {
            Ok(data) => Arc::new(data),
            Err(e) => {
                error!("Dropping {} broadcast: {}", packet.kind(), e);
                return false;
            }
        };

        if let Err(e) = self.outbox.send(GameMessage::BroadcastPacket { data, targets }) {
            error!("Failed to queue broadcast packet: {}", e);
            return false;
        }
        true
    }

    pub fn send_to(&self, packet: &Packet, addr: SocketAddr) -> bool {
        let data = match encode(packet) {
            Ok(data) => data,
            Err(e) => {
                error!("Dropping {} for {}: {}", packet.kind(), addr, e);
                return false;
            }
        };

        if let Err(e) = self.outbox.send(GameMessage::SendPacket { data, addr }) {
            error!("Failed to queue packet for sending: {}", e);
            return false;
        }
        true
    }

    /// Sends this tick's snapshot to every connected peer.
    pub fn publish(
        &mut self,
        tick: u32,
        world: &WorldState,
        targets: Vec<(u32, SocketAddr)>,
    ) -> bool {
        let sent = self.broadcast(&state_packet(tick, world), targets);
        if sent {
            self.published += 1;
        }
        sent
    }
}

/// Events delivered to the observer collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum ObserverEvent {
    StateChanged {
        time: SystemTime,
        players: Vec<PlayerSnapshot>,
        orbs: Vec<OrbSnapshot>,
    },
    PacketObserved {
        source: SocketAddr,
        payload: Vec<u8>,
        time: SystemTime,
    },
}

pub trait ObserverSink: Send + Sync {
    fn emit(&self, event: ObserverEvent);
}

/// Writes observer events to the debug log.
pub struct LogObserver;

impl ObserverSink for LogObserver {
    fn emit(&self, event: ObserverEvent) {
        match event {
            ObserverEvent::StateChanged { players, orbs, .. } => {
                let summary: Vec<String> = players
                    .iter()
                    .map(|p| format!("{}:({:.1},{:.1}) s{}", p.id, p.x, p.y, p.score))
                    .collect();
                debug!(
                    "[observer] state changed: {} | {} orbs",
                    summary.join(" | "),
                    orbs.len()
                );
            }
            ObserverEvent::PacketObserved {
                source, payload, ..
            } => {
                debug!("[observer] {} bytes from {}", payload.len(), source);
            }
        }
    }
}

/// Forwards observer events onto a channel.
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ObserverEvent>,
}

impl ChannelObserver {
    pub fn new(tx: mpsc::UnboundedSender<ObserverEvent>) -> Self {
        Self { tx }
    }
}

impl ObserverSink for ChannelObserver {
    fn emit(&self, event: ObserverEvent) {
        // A closed channel just means nobody is watching any more.
        let _ = self.tx.send(event);
    }
}

/// Change-suppressed state mirror for the observer sink.
pub struct ObserverMirror {
    sink: Arc<dyn ObserverSink>,
    last_players: Vec<PlayerSnapshot>,
    last_orbs: Vec<OrbSnapshot>,
    primed: bool,
}

impl ObserverMirror {
    pub fn new(sink: Arc<dyn ObserverSink>) -> Self {
        Self {
            sink,
            last_players: Vec::new(),
            last_orbs: Vec::new(),
            primed: false,
        }
    }

    /// Emits `StateChanged` only if players or orbs differ from the last
    /// emission. Returns whether an event was emitted.
    pub fn publish_if_changed(&mut self, world: &WorldState) -> bool {
        let players = world.player_snapshots();
        let orbs = world.orb_snapshots();

        if self.primed && players == self.last_players && orbs == self.last_orbs {
            return false;
        }

        self.last_players = players.clone();
        self.last_orbs = orbs.clone();
        self.primed = true;
        self.sink.emit(ObserverEvent::StateChanged {
            time: SystemTime::now(),
            players,
            orbs,
        });
        true
    }

    /// Raw-packet event, emitted for every received datagram.
    pub fn packet_observed(sink: &dyn ObserverSink, source: SocketAddr, payload: &[u8]) {
        sink.emit(ObserverEvent::PacketObserved {
            source,
            payload: payload.to_vec(),
            time: SystemTime::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Orb, SimPlayer};
    use shared::decode;

    fn world() -> WorldState {
        let mut world = WorldState::new(800.0, 600.0);
        world
            .players
            .push(SimPlayer::new("p1".to_string(), 0, 100.0, 100.0));
        world.orbs.push(Orb {
            id: "orb_0000".to_string(),
            x: 50.0,
            y: 60.0,
        });
        world
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_state_packet_projection() {
        match state_packet(7, &world()) {
            Packet::State {
                tick,
                players,
                orbs,
            } => {
                assert_eq!(tick, 7);
                assert_eq!(players.len(), 1);
                assert_eq!(players[0].id, "p1");
                assert_eq!(orbs[0].id, "orb_0000");
            }
            other => panic!("Unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_publish_queues_every_tick() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut broadcaster = StateBroadcaster::new(tx);
        let world = world();
        let targets = vec![(1, addr(5000)), (2, addr(5001))];

        // Identical state is still sent each tick.
        assert!(broadcaster.publish(1, &world, targets.clone()));
        assert!(broadcaster.publish(2, &world, targets.clone()));
        assert_eq!(broadcaster.published(), 2);

        for expected_tick in 1..=2 {
            match rx.try_recv().unwrap() {
                GameMessage::BroadcastPacket { data, targets: t } => {
                    assert_eq!(t, targets);
                    match decode(&data).unwrap() {
                        Packet::State { tick, .. } => assert_eq!(tick, expected_tick),
                        other => panic!("Unexpected packet: {:?}", other),
                    }
                }
                other => panic!("Unexpected message: {:?}", other),
            }
        }
    }

    #[test]
    fn test_publish_without_peers_is_skipped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut broadcaster = StateBroadcaster::new(tx);
        assert!(!broadcaster.publish(1, &world(), vec![]));
        assert_eq!(broadcaster.published(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_to_single_peer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broadcaster = StateBroadcaster::new(tx);
        assert!(broadcaster.send_to(&Packet::Connected { peer_id: 3 }, addr(6000)));

        match rx.try_recv().unwrap() {
            GameMessage::SendPacket { data, addr: a } => {
                assert_eq!(a, addr(6000));
                assert_eq!(decode(&data).unwrap(), Packet::Connected { peer_id: 3 });
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_closed_outbox_does_not_panic() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut broadcaster = StateBroadcaster::new(tx);
        assert!(!broadcaster.publish(1, &world(), vec![(1, addr(5000))]));
    }

    #[test]
    fn test_mirror_suppresses_unchanged_state() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut mirror = ObserverMirror::new(Arc::new(ChannelObserver::new(tx)));
        let mut world = world();

        assert!(mirror.publish_if_changed(&world));
        assert!(!mirror.publish_if_changed(&world));
        assert!(!mirror.publish_if_changed(&world));

        world.players[0].x += 1.0;
        assert!(mirror.publish_if_changed(&world));

        world.orbs[0].id = "orb_0001".to_string();
        assert!(mirror.publish_if_changed(&world));

        let mut emitted = 0;
        while let Ok(event) = rx.try_recv() {
            assert!(matches!(event, ObserverEvent::StateChanged { .. }));
            emitted += 1;
        }
        assert_eq!(emitted, 3);
    }

    #[test]
    fn test_mirror_sees_score_change() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut mirror = ObserverMirror::new(Arc::new(ChannelObserver::new(tx)));
        let mut world = world();

        mirror.publish_if_changed(&world);
        world.players[0].score = 1;
        assert!(mirror.publish_if_changed(&world));
    }

    #[test]
    fn test_packet_observed_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelObserver::new(tx);
        ObserverMirror::packet_observed(&sink, addr(7000), b"raw");

        match rx.try_recv().unwrap() {
            ObserverEvent::PacketObserved {
                source, payload, ..
            } => {
                assert_eq!(source, addr(7000));
                assert_eq!(payload, b"raw".to_vec());
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }
}
