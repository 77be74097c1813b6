use crate::buffer::ClientStateBuffer;
use crate::input::{InputThrottle, IntentSource, OrbPilot, PilotView};
use crate::session::Session;
use log::{debug, error, info, trace, warn};
use shared::{
    decode, encode, ChaosConfig, ChaosInjector, Delivery, Packet, MAX_DATAGRAM_SIZE,
    PROTOCOL_VERSION,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    pub player_id: String,
    /// How often the intent source is polled
    pub poll_interval: Duration,
    /// How often the consumer queries the interpolated view
    pub query_interval: Duration,
    pub report_interval: Duration,
    pub chaos: Option<ChaosConfig>,
    pub seed: Option<u64>,
}

impl ClientConfig {
    pub fn new(server_addr: impl Into<String>, player_id: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            player_id: player_id.into(),
            poll_interval: Duration::from_millis(10),
            query_interval: Duration::from_millis(16),
            report_interval: Duration::from_secs(2),
            chaos: None,
            seed: None,
        }
    }
}

/// Counters reported periodically and on exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub snapshots_applied: u64,
    pub snapshots_discarded: u64,
    pub inputs_sent: u64,
}

pub struct Client {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    config: ClientConfig,
    peer_id: Option<u32>,
    connected: bool,

    buffer: Arc<ClientStateBuffer>,
    session: Session,
    throttle: InputThrottle,
    pilot: Box<dyn IntentSource + Send>,
    chaos: Arc<ChaosInjector>,

    epoch: Instant,
    stats: ClientStats,
    inbox_tx: mpsc::UnboundedSender<Packet>,
    inbox_rx: mpsc::UnboundedReceiver<Packet>,
}

impl Client {
    pub async fn new(config: ClientConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let server_addr: SocketAddr = config.server_addr.parse()?;

        let (buffer, chaos) = match config.seed {
            Some(seed) => (
                ClientStateBuffer::with_seed(seed),
                ChaosInjector::with_seed(seed.wrapping_add(1)),
            ),
            None => (ClientStateBuffer::new(), ChaosInjector::new()),
        };
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

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        Ok(Client {
            socket,
            server_addr,
            peer_id: None,
            connected: false,
            buffer: Arc::new(buffer),
            session: Session::new(config.player_id.clone()),
            throttle: InputThrottle::new(),
            pilot: Box::new(OrbPilot),
            chaos: Arc::new(chaos),
            epoch: Instant::now(),
            stats: ClientStats::default(),
            inbox_tx,
            inbox_rx,
            config,
        })
    }

    /// Replaces the headless pilot with another intent source
    pub fn with_pilot(mut self, pilot: Box<dyn IntentSource + Send>) -> Self {
        self.pilot = pilot;
        self
    }

    pub fn buffer(&self) -> Arc<ClientStateBuffer> {
        Arc::clone(&self.buffer)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn chaos(&self) -> Arc<ChaosInjector> {
        Arc::clone(&self.chaos)
    }

    pub fn stats(&self) -> ClientStats {
        self.stats
    }

    pub fn peer_id(&self) -> Option<u32> {
        self.peer_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Seconds since the client started; the time base for ingest and query.
    fn clock(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn spawn_network_receiver(&self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let inbox = self.inbox_tx.clone();
        let chaos = Arc::clone(&self.chaos);
        let server_addr = self.server_addr;

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
                if addr != server_addr {
                    debug!("Ignoring datagram from unknown sender {}", addr);
                    continue;
                }

                let delivery = chaos.verdict();
                if delivery == Delivery::Drop {
                    trace!("Chaos dropped inbound datagram");
                    continue;
                }

                let packet = match decode(&buffer[..len]) {
                    Ok(packet) => packet,
                    Err(e) => {
                        warn!("Discarding datagram from server: {}", e);
                        continue;
                    }
                };

                match delivery {
                    Delivery::After(delay) => {
                        let inbox = inbox.clone();
                        tokio::spawn(async move {
                            sleep(delay).await;
                            let _ = inbox.send(packet);
                        });
                    }
                    _ => {
                        if inbox.send(packet).is_err() {
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn send_packet(&self, packet: &Packet) {
        let data = match encode(packet) {
            Ok(data) => data,
            Err(e) => {
                error!("Dropping outbound {}: {}", packet.kind(), e);
                return;
            }
        };

        match self.chaos.verdict() {
            Delivery::Drop => trace!("Chaos dropped outbound {}", packet.kind()),
            Delivery::Now => send_datagram(&self.socket, &data, self.server_addr).await,
            Delivery::After(delay) => {
                let socket = Arc::clone(&self.socket);
                let addr = self.server_addr;
                tokio::spawn(async move {
                    sleep(delay).await;
                    send_datagram(&socket, &data, addr).await;
                });
            }
        }
    }

    async fn connect(&mut self) {
        info!("Connecting to {} as {}", self.server_addr, self.session.local_id());
        self.send_packet(&Packet::Connect {
            client_version: PROTOCOL_VERSION,
        })
        .await;
    }

    fn handle_packet(&mut self, packet: Packet, arrival: f64) {
        match packet {
            Packet::Connected { peer_id } => {
                info!("Connected! Peer ID: {}", peer_id);
                self.peer_id = Some(peer_id);
                self.connected = true;
            }

            Packet::State {
                tick,
                players,
                orbs,
            } => {
                if !self.session.accept_tick(tick) {
                    self.stats.snapshots_discarded += 1;
                    return;
                }
                self.connected = true;
                self.buffer.ingest_snapshot(&players, &orbs, arrival);
                self.session.observe_players(&players);
                self.stats.snapshots_applied += 1;
            }

            Packet::GameOver { winner_id } => {
                self.session.game_over(&winner_id);
            }

            Packet::Reset => {
                info!("New match starting");
                self.buffer.reset();
                self.session.reset();
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.connected = false;
                self.peer_id = None;
            }

            other => {
                warn!("Unexpected {} packet from server", other.kind());
            }
        }
    }

    async fn poll_input(&mut self) {
        let now = self.clock();
        let local = self.buffer.query(self.session.local_id(), now);
        let orbs = self.buffer.orbs();
        let view = PilotView {
            pose: local.as_ref().map(|e| e.pose),
            boost_charges: local.as_ref().map_or(0, |e| e.boost_charges),
            orbs: &orbs,
        };

        let intent = self.pilot.sample(&view);
        if let Some(intent) = self.throttle.offer(intent) {
            let packet = Packet::Input {
                id: self.session.local_id().to_string(),
                dx: intent.dx,
                dy: intent.dy,
                boost: intent.boost,
            };
            self.send_packet(&packet).await;
            self.stats.inputs_sent += 1;
        }
    }

    fn report(&self) {
        let me = self.buffer.query(self.session.local_id(), self.clock());
        let status = self.chaos.status();
        match me {
            Some(me) => info!(
                "{} at ({:.0},{:.0}) score {} charges {} | {} players, {} orbs | {} snapshots ({} stale) | chaos {}",
                self.session.local_id(),
                me.pose.x,
                me.pose.y,
                me.score,
                me.boost_charges,
                self.buffer.len(),
                self.buffer.orbs().len(),
                self.stats.snapshots_applied,
                self.stats.snapshots_discarded,
                if status.active { "on" } else { "off" }
            ),
            None => info!(
                "Waiting for state ({} inputs sent, connected: {})",
                self.stats.inputs_sent, self.connected
            ),
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await
    }

    /// Runs the client until `shutdown` resolves, then says goodbye.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: Future<Output = ()>,
    {
        let receiver = self.spawn_network_receiver();
        self.connect().await;

        let mut input_interval = interval(self.config.poll_interval);
        let mut query_interval = interval(self.config.query_interval);
        let mut report_interval = interval(self.config.report_interval);
        for timer in [&mut input_interval, &mut query_interval, &mut report_interval] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                Some(packet) = self.inbox_rx.recv() => {
                    let arrival = self.clock();
                    self.handle_packet(packet, arrival);
                },

                _ = input_interval.tick() => {
                    self.poll_input().await;
                },

                _ = query_interval.tick() => {
                    let view = self.buffer.query_all(self.clock());
                    trace!("Queried {} entities", view.len());
                },

                _ = report_interval.tick() => {
                    self.report();
                },

                _ = &mut shutdown => {
                    info!("Shutting down client");
                    break;
                },
            }
        }

        if self.connected {
            self.send_packet(&Packet::Disconnect).await;
        }
        receiver.abort();
        info!(
            "Client finished: {} snapshots applied, {} discarded, {} inputs sent",
            self.stats.snapshots_applied, self.stats.snapshots_discarded, self.stats.inputs_sent
        );

        Ok(())
    }
}

async fn send_datagram(socket: &UdpSocket, data: &[u8], addr: SocketAddr) {
    if let Err(e) = socket.send_to(data, addr).await {
        error!("Failed to send packet to {}: {}", addr, e);
    }
}
