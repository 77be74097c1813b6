//! Server network layer handling UDP communications and the fixed-rate game loop

use crate::broadcast::{state_packet, LogObserver, ObserverMirror, ObserverSink, StateBroadcaster};
use crate::config::ServerConfig;
use crate::registry::ConnectionRegistry;
use crate::simulation::{InputOutcome, SimulationEngine};
use log::{debug, error, info, warn};
use shared::{decode, ChaosInjector, Delivery, Packet, MAX_DATAGRAM_SIZE, PROTOCOL_VERSION};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Messages sent from network tasks to the game loop inbox
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
}

/// Messages sent from the game loop to the network sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket {
        data: Vec<u8>,
        addr: SocketAddr,
    },
    BroadcastPacket {
        data: Arc<Vec<u8>>,
        targets: Vec<(u32, SocketAddr)>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchPhase {
    Playing,
    Intermission { remaining_ticks: u32 },
}

/// Main server coordinating networking and game simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    config: ServerConfig,
    engine: SimulationEngine,
    registry: ConnectionRegistry,
    broadcaster: StateBroadcaster,
    observer: Option<Arc<dyn ObserverSink>>,
    mirror: Option<ObserverMirror>,
    chaos: Arc<ChaosInjector>,
    phase: MatchPhase,
    /// Sequence stamped on every outgoing snapshot
    frame: u32,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        let engine = match config.seed {
            Some(seed) => SimulationEngine::with_seed(
                config.world_width,
                config.world_height,
                config.orb_count,
                seed,
            ),
            None => SimulationEngine::new(config.world_width, config.world_height, config.orb_count),
        };

        let chaos = Arc::new(match config.seed {
            Some(seed) => ChaosInjector::with_seed(seed.wrapping_add(1)),
            None => ChaosInjector::new(),
        });
        if let Some(c) = &config.chaos {
            c.apply(&chaos);
            info!(
                "Chaos enabled for {:?}: {}ms +/- {}ms latency, {:.0}% loss",
                c.duration,
                c.latency_ms,
                c.jitter_ms,
                c.loss * 100.0
            );
        }

        let mut server = Server {
            socket,
            registry: ConnectionRegistry::new(config.max_clients, config.client_timeout),
            engine,
            broadcaster: StateBroadcaster::new(game_tx),
            observer: None,
            mirror: None,
            chaos,
            phase: MatchPhase::Playing,
            frame: 0,
            server_tx,
            server_rx,
            game_rx: Some(game_rx),
            config,
        };

        if server.config.observe {
            server = server.with_observer(Arc::new(LogObserver));
        }
        Ok(server)
    }

    /// Attaches the external observer that mirrors state and raw packets
    pub fn with_observer(mut self, sink: Arc<dyn ObserverSink>) -> Self {
        self.mirror = Some(ObserverMirror::new(Arc::clone(&sink)));
        self.observer = Some(sink);
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle to the chaos switch, usable from any task
    pub fn chaos(&self) -> Arc<ChaosInjector> {
        Arc::clone(&self.chaos)
    }

    pub fn engine(&self) -> &SimulationEngine {
        &self.engine
    }

    /// Spawns task that continuously listens for incoming datagrams
    fn spawn_network_receiver(&self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();
        let chaos = Arc::clone(&self.chaos);
        let observer = self.observer.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM_SIZE];

            loop {
                let (len, addr) = match socket.recv_from(&mut buffer).await {
                    Ok(received) => received,
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        sleep(Duration::from_millis(10)).await;
                        continue;
                    }
                };
                let bytes = &buffer[..len];

                if let Some(sink) = &observer {
                    ObserverMirror::packet_observed(sink.as_ref(), addr, bytes);
                }

                let delivery = chaos.verdict();
                if delivery == Delivery::Drop {
                    debug!("Chaos dropped inbound datagram from {}", addr);
                    continue;
                }

                let packet = match decode(bytes) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!("Discarding datagram from {}: {}", addr, e);
                        continue;
                    }
                };

                let message = ServerMessage::PacketReceived { packet, addr };
                match delivery {
                    Delivery::After(delay) => {
                        let server_tx = server_tx.clone();
                        tokio::spawn(async move {
                            sleep(delay).await;
                            let _ = server_tx.send(message);
                        });
                    }
                    _ => {
                        if let Err(e) = server_tx.send(message) {
                            error!("Failed to send packet to main loop: {}", e);
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Spawns task that processes the outgoing packet queue
    fn spawn_network_sender(&mut self) -> Option<JoinHandle<()>> {
        let socket = Arc::clone(&self.socket);
        let chaos = Arc::clone(&self.chaos);
        let mut game_rx = self.game_rx.take()?;

        Some(tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { data, addr } => {
                        dispatch(&socket, &chaos, Arc::new(data), addr).await;
                    }
                    GameMessage::BroadcastPacket { data, targets } => {
                        for (_, addr) in targets {
                            dispatch(&socket, &chaos, Arc::clone(&data), addr).await;
                        }
                    }
                }
            }
        }))
    }

    /// Applies one decoded datagram to the registry and simulation
    fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    let response = Packet::Disconnected {
                        reason: "Protocol version mismatch".to_string(),
                    };
                    self.broadcaster.send_to(&response, addr);
                    return;
                }

                // Replace any stale registration from the same address
                if let Some(existing_id) = self.registry.find_peer_by_addr(addr) {
                    info!("Removing existing peer {} from {}", existing_id, addr);
                    self.drop_peer(existing_id);
                }

                let response = match self.registry.add_peer(addr) {
                    Some(peer_id) => Packet::Connected { peer_id },
                    None => Packet::Disconnected {
                        reason: "Server full".to_string(),
                    },
                };
                self.broadcaster.send_to(&response, addr);
            }

            Packet::Input { id, dx, dy, boost } => {
                let peer_id = match self.registry.find_peer_by_addr(addr) {
                    Some(peer_id) => peer_id,
                    None => match self.registry.add_peer(addr) {
                        Some(peer_id) => peer_id,
                        None => {
                            let response = Packet::Disconnected {
                                reason: "Server full".to_string(),
                            };
                            self.broadcaster.send_to(&response, addr);
                            return;
                        }
                    },
                };
                self.registry.touch(peer_id);

                if id.trim().is_empty() {
                    warn!("Ignoring input without a player id from {}", addr);
                    return;
                }

                if let Some(old) = self.registry.bind_player(peer_id, &id).released {
                    self.engine.remove_player(&old);
                }
                if self.engine.apply_input(&id, dx, dy, boost) == InputOutcome::Created {
                    info!("Player {} joined through peer {}", id, peer_id);
                }
            }

            Packet::Disconnect => {
                if let Some(peer_id) = self.registry.find_peer_by_addr(addr) {
                    self.drop_peer(peer_id);
                }
            }

            other => {
                warn!(
                    "Unexpected {} packet from client at {}",
                    other.kind(),
                    addr
                );
            }
        }
    }

    fn drop_peer(&mut self, peer_id: u32) {
        if let Some(peer) = self.registry.remove_peer(peer_id) {
            if let Some(player_id) = peer.player_id {
                self.engine.remove_player(&player_id);
            }
        }
    }

    fn remove_timed_out_peers(&mut self) {
        for peer in self.registry.check_timeouts() {
            info!("Peer {} timed out", peer.id);
            if let Some(player_id) = peer.player_id {
                self.engine.remove_player(&player_id);
            }
        }
    }

    /// Runs one fixed tick: drain the inbox, simulate, then broadcast
    fn step(&mut self) {
        while let Ok(ServerMessage::PacketReceived { packet, addr }) = self.server_rx.try_recv() {
            self.handle_packet(packet, addr);
        }

        if self.frame % self.config.ticks_per_second() == 0 {
            self.remove_timed_out_peers();
        }

        self.advance_match();

        self.frame = self.frame.wrapping_add(1);
        self.broadcaster.publish(
            self.frame,
            self.engine.world(),
            self.registry.peer_addrs(),
        );
        if let Some(mirror) = &mut self.mirror {
            mirror.publish_if_changed(self.engine.world());
        }
    }

    fn advance_match(&mut self) {
        match self.phase {
            MatchPhase::Playing => {
                for collection in self.engine.tick(self.config.tick_dt()) {
                    debug!(
                        "Player {} collected {} (replaced by {})",
                        collection.player_id, collection.orb_id, collection.spawned_orb_id
                    );
                }

                let Some(target) = self.config.score_to_win else {
                    return;
                };
                if let Some(winner_id) = self.engine.winner(target).map(str::to_string) {
                    info!("Player {} won the match with {} points", winner_id, target);
                    self.broadcaster
                        .broadcast(&Packet::GameOver { winner_id }, self.registry.peer_addrs());
                    self.phase = MatchPhase::Intermission {
                        remaining_ticks: self.intermission_ticks(),
                    };
                }
            }
            MatchPhase::Intermission { remaining_ticks: 0 } => {
                self.engine.reset_match();
                self.broadcaster
                    .broadcast(&Packet::Reset, self.registry.peer_addrs());
                self.phase = MatchPhase::Playing;
            }
            MatchPhase::Intermission { remaining_ticks } => {
                self.phase = MatchPhase::Intermission {
                    remaining_ticks: remaining_ticks - 1,
                };
            }
        }
    }

    fn intermission_ticks(&self) -> u32 {
        let tick_ms = self.config.tick_duration.as_millis().max(1);
        (self.config.intermission.as_millis() / tick_ms) as u32
    }

    /// Runs the game loop until Ctrl+C
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Runs the game loop until `shutdown` resolves. No further ticks are
    /// scheduled after that; queued sends are best effort.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future<Output = ()>,
    {
        if self.spawn_network_sender().is_none() {
            return Err("server loop already ran; outbound queue is gone".into());
        }
        let receiver = self.spawn_network_receiver();

        let mut tick_interval = interval(self.config.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!("Server started successfully");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Server shutting down");
                    break;
                }

                _ = tick_interval.tick() => {
                    let started = Instant::now();
                    self.step();

                    let elapsed = started.elapsed();
                    if elapsed > self.config.tick_duration {
                        warn!(
                            "Tick {} took {:?}, longer than the {:?} budget",
                            self.frame, elapsed, self.config.tick_duration
                        );
                    }

                    // Periodic diagnostics
                    if self.frame % self.config.ticks_per_second() == 0 && !self.registry.is_empty() {
                        let status = self.chaos.status();
                        debug!(
                            "Tick {}: {} peers, {} players, {} snapshots sent, chaos {}",
                            self.frame,
                            self.registry.len(),
                            self.engine.player_count(),
                            self.broadcaster.published(),
                            if status.active { "on" } else { "off" }
                        );
                    }
                }
            }
        }

        let goodbye = Packet::Disconnected {
            reason: "Server shutting down".to_string(),
        };
        self.broadcaster.broadcast(&goodbye, self.registry.peer_addrs());
        receiver.abort();

        Ok(())
    }

    /// Snapshot that would be sent right now
    pub fn current_state(&self) -> Packet {
        state_packet(self.frame, self.engine.world())
    }
}

/// Sends one datagram through the chaos gate
async fn dispatch(
    socket: &Arc<UdpSocket>,
    chaos: &ChaosInjector,
    data: Arc<Vec<u8>>,
    addr: SocketAddr,
) {
    match chaos.verdict() {
        Delivery::Drop => debug!("Chaos dropped outbound datagram to {}", addr),
        Delivery::Now => send_datagram(socket, &data, addr).await,
        Delivery::After(delay) => {
            let socket = Arc::clone(socket);
            tokio::spawn(async move {
                sleep(delay).await;
                send_datagram(&socket, &data, addr).await;
            });
        }
    }
}

async fn send_datagram(socket: &UdpSocket, data: &[u8], addr: SocketAddr) {
    if let Err(e) = socket.send_to(data, addr).await {
        error!("Failed to send packet to {}: {}", addr, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::{ChannelObserver, ObserverEvent};
    use shared::{PLAYER_SPEED, WORLD_WIDTH};

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            seed: Some(5),
            ..ServerConfig::default()
        }
    }

    fn client_addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn input(id: &str, dx: f32, dy: f32, boost: bool) -> Packet {
        Packet::Input {
            id: id.to_string(),
            dx,
            dy,
            boost,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<GameMessage>) -> Vec<GameMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn decoded(message: &GameMessage) -> Packet {
        match message {
            GameMessage::SendPacket { data, .. } => decode(data).unwrap(),
            GameMessage::BroadcastPacket { data, .. } => decode(data).unwrap(),
        }
    }

    #[test]
    fn test_server_message_creation() {
        let packet = Packet::Connect { client_version: 1 };
        let addr = client_addr(8080);

        match (ServerMessage::PacketReceived {
            packet: packet.clone(),
            addr,
        }) {
            ServerMessage::PacketReceived { packet: p, addr: a } => {
                assert_eq!(a, addr);
                assert_eq!(p, packet);
            }
        }
    }

    #[tokio::test]
    async fn test_connect_assigns_peer_id() {
        let mut server = Server::new(test_config()).await.unwrap();
        let mut game_rx = server.game_rx.take().unwrap();

        server.handle_packet(Packet::Connect { client_version: 1 }, client_addr(4000));
        let messages = drain(&mut game_rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(decoded(&messages[0]), Packet::Connected { peer_id: 1 });
        assert_eq!(server.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_version_mismatch() {
        let mut server = Server::new(test_config()).await.unwrap();
        let mut game_rx = server.game_rx.take().unwrap();

        server.handle_packet(Packet::Connect { client_version: 99 }, client_addr(4000));
        let messages = drain(&mut game_rx);
        assert!(matches!(decoded(&messages[0]), Packet::Disconnected { .. }));
        assert!(server.registry.is_empty());
    }

    #[tokio::test]
    async fn test_server_full() {
        let config = ServerConfig {
            max_clients: 1,
            ..test_config()
        };
        let mut server = Server::new(config).await.unwrap();
        let mut game_rx = server.game_rx.take().unwrap();

        server.handle_packet(Packet::Connect { client_version: 1 }, client_addr(4000));
        server.handle_packet(input("p2", 1.0, 0.0, false), client_addr(4001));

        let messages = drain(&mut game_rx);
        assert_eq!(
            decoded(&messages[1]),
            Packet::Disconnected {
                reason: "Server full".to_string()
            }
        );
        assert_eq!(server.engine.player_count(), 0);
    }

    #[tokio::test]
    async fn test_input_from_unknown_peer_creates_player() {
        let mut server = Server::new(test_config()).await.unwrap();
        server.handle_packet(input("p1", 1.0, 0.0, false), client_addr(4000));

        assert_eq!(server.registry.len(), 1);
        assert_eq!(server.registry.peer_for_player("p1"), Some(1));
        assert!(server.engine.world().player("p1").is_some());
    }

    #[tokio::test]
    async fn test_blank_player_id_ignored() {
        let mut server = Server::new(test_config()).await.unwrap();
        server.handle_packet(input("", 1.0, 0.0, false), client_addr(4000));
        assert_eq!(server.engine.player_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_removes_player() {
        let mut server = Server::new(test_config()).await.unwrap();
        server.handle_packet(Packet::Connect { client_version: 1 }, client_addr(4000));
        server.handle_packet(input("p1", 1.0, 0.0, false), client_addr(4000));
        assert_eq!(server.engine.player_count(), 1);

        server.handle_packet(Packet::Disconnect, client_addr(4000));
        assert_eq!(server.engine.player_count(), 0);
        assert!(server.registry.is_empty());
    }

    #[tokio::test]
    async fn test_switching_player_id_removes_old_player() {
        let mut server = Server::new(test_config()).await.unwrap();
        let addr = client_addr(4000);

        server.handle_packet(input("a", 1.0, 0.0, false), addr);
        server.handle_packet(input("b", 1.0, 0.0, false), addr);
        assert!(server.engine.world().player("a").is_none());
        assert!(server.engine.world().player("b").is_some());

        server.handle_packet(Packet::Disconnect, addr);
        assert_eq!(server.engine.player_count(), 0);
        assert!(server.registry.is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_stale_peer() {
        let mut server = Server::new(test_config()).await.unwrap();
        server.handle_packet(Packet::Connect { client_version: 1 }, client_addr(4000));
        server.handle_packet(input("p1", 0.0, 0.0, false), client_addr(4000));
        server.handle_packet(Packet::Connect { client_version: 1 }, client_addr(4000));

        assert_eq!(server.registry.len(), 1);
        assert_eq!(server.engine.player_count(), 0);
    }

    #[tokio::test]
    async fn test_step_drains_inbox_and_broadcasts() {
        let mut server = Server::new(test_config()).await.unwrap();
        let mut game_rx = server.game_rx.take().unwrap();
        let addr = client_addr(4000);

        for _ in 0..40 {
            server
                .server_tx
                .send(ServerMessage::PacketReceived {
                    packet: input("p1", 1.0, 0.0, false),
                    addr,
                })
                .unwrap();
            server.step();
        }

        let states: Vec<Packet> = drain(&mut game_rx)
            .iter()
            .map(decoded)
            .filter(|p| matches!(p, Packet::State { .. }))
            .collect();
        assert_eq!(states.len(), 40);

        match states.last().unwrap() {
            Packet::State {
                tick,
                players,
                orbs,
            } => {
                assert_eq!(*tick, 40);
                assert_eq!(orbs.len(), 6);
                let p1 = players.iter().find(|p| p.id == "p1").unwrap();
                assert!((p1.x - (WORLD_WIDTH / 2.0 + PLAYER_SPEED)).abs() < 0.01);
            }
            other => panic!("Unexpected packet: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_match_end_and_reset() {
        // In an 80x80 world every orb spawns on the centre, where players start.
        let config = ServerConfig {
            world_width: 80.0,
            world_height: 80.0,
            score_to_win: Some(1),
            intermission: Duration::from_millis(50),
            ..test_config()
        };
        let mut server = Server::new(config).await.unwrap();
        let mut game_rx = server.game_rx.take().unwrap();

        server.handle_packet(input("p1", 0.0, 0.0, false), client_addr(4000));

        server.step();
        assert_eq!(
            server.phase,
            MatchPhase::Intermission { remaining_ticks: 2 }
        );
        assert!(server.engine.world().player("p1").unwrap().score >= 1);

        server.step();
        server.step();
        server.step();
        assert_eq!(server.phase, MatchPhase::Playing);
        assert_eq!(server.engine.world().player("p1").unwrap().score, 0);

        let packets: Vec<Packet> = drain(&mut game_rx).iter().map(decoded).collect();
        assert!(packets.contains(&Packet::GameOver {
            winner_id: "p1".to_string()
        }));
        assert!(packets.contains(&Packet::Reset));
        let game_over_at = packets
            .iter()
            .position(|p| matches!(p, Packet::GameOver { .. }))
            .unwrap();
        let reset_at = packets.iter().position(|p| *p == Packet::Reset).unwrap();
        assert!(game_over_at < reset_at);
    }

    #[tokio::test]
    async fn test_observer_mirror_is_change_suppressed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut server = Server::new(test_config())
            .await
            .unwrap()
            .with_observer(Arc::new(ChannelObserver::new(tx)));

        server.step();
        server.step();
        server.step();

        let mut changes = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, ObserverEvent::StateChanged { .. }) {
                changes += 1;
            }
        }
        assert_eq!(changes, 1);
    }

    #[tokio::test]
    async fn test_run_until_stops_on_shutdown() {
        let mut server = Server::new(test_config()).await.unwrap();
        let result = server
            .run_until(sleep(Duration::from_millis(120)))
            .await;
        assert!(result.is_ok());
        assert!(server.frame >= 2);
    }

    #[tokio::test]
    async fn test_run_until_only_runs_once() {
        let mut server = Server::new(test_config()).await.unwrap();
        assert!(server.run_until(sleep(Duration::from_millis(30))).await.is_ok());

        let frame = server.frame;
        let second = server.run_until(sleep(Duration::from_millis(30))).await;
        assert!(second.is_err());
        assert_eq!(server.frame, frame);
    }

    #[tokio::test]
    async fn test_intermission_ticks() {
        let server = Server::new(test_config()).await.unwrap();
        assert_eq!(server.intermission_ticks(), 120);

        let config = ServerConfig {
            intermission: Duration::from_millis(50),
            ..test_config()
        };
        let server = Server::new(config).await.unwrap();
        assert_eq!(server.intermission_ticks(), 2);
    }
}
