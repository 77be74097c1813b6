//! Peer connection tracking for the authoritative server
//!
//! This module maps transport peers (UDP addresses) to the player ids they
//! control, and handles:
//! - Peer registration on `Connect` or on first sight of an `Input`
//! - Binding a peer to the player id carried in its inputs
//! - Liveness tracking and timeout-based removal
//! - Capacity limits
//!
//! The registry holds no reference to the socket; callers get plain addresses
//! back and use them only for the send they are about to make.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected transport peer
#[derive(Debug, Clone)]
pub struct Peer {
    /// Unique peer identifier assigned by the server
    pub id: u32,
    /// Network address for sending datagrams
    pub addr: SocketAddr,
    /// Last time we received any datagram from this peer
    pub last_seen: Instant,
    /// Player this peer currently drives, once it has sent an input
    pub player_id: Option<String>,
}

impl Peer {
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            player_id: None,
        }
    }

    /// Returns true if nothing has been heard from this peer within `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// What a call to [`ConnectionRegistry::bind_player`] displaced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Binding {
    /// Peer that held the player id before
    pub moved_from: Option<u32>,
    /// Player the peer drove before; nothing owns it any more
    pub released: Option<String>,
}

/// Maps peers to players and enforces the connection limit
pub struct ConnectionRegistry {
    /// Connected peers indexed by their id
    peers: HashMap<u32, Peer>,
    /// Next id handed to a new peer
    next_peer_id: u32,
    /// Maximum number of concurrent peers
    max_peers: usize,
    /// Silence after which a peer is considered gone
    timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(max_peers: usize, timeout: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            next_peer_id: 1,
            max_peers,
            timeout,
        }
    }

    /// Registers a new peer. Returns None when the server is at capacity.
    pub fn add_peer(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.peers.len() >= self.max_peers {
            return None;
        }

        let peer_id = self.next_peer_id;
        self.next_peer_id += 1;

        info!("Peer {} connected from {}", peer_id, addr);
        self.peers.insert(peer_id, Peer::new(peer_id, addr));
        Some(peer_id)
    }

    /// Removes a peer and returns it so the caller can drop its player
    pub fn remove_peer(&mut self, peer_id: u32) -> Option<Peer> {
        let peer = self.peers.remove(&peer_id)?;
        info!(
            "Peer {} disconnected (player: {})",
            peer.id,
            peer.player_id.as_deref().unwrap_or("none")
        );
        Some(peer)
    }

    pub fn find_peer_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.peers
            .values()
            .find(|peer| peer.addr == addr)
            .map(|peer| peer.id)
    }

    pub fn peer(&self, peer_id: u32) -> Option<&Peer> {
        self.peers.get(&peer_id)
    }

    /// Marks the peer as alive
    pub fn touch(&mut self, peer_id: u32) {
        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.last_seen = Instant::now();
        }
    }

    /// Associates `player_id` with `peer_id`.
    ///
    /// A player id belongs to at most one peer, and a peer drives at most one
    /// player. The returned [`Binding`] says what the new association displaced.
    pub fn bind_player(&mut self, peer_id: u32, player_id: &str) -> Binding {
        if !self.peers.contains_key(&peer_id) {
            return Binding::default();
        }

        let moved_from = self.peer_for_player(player_id).filter(|id| *id != peer_id);
        if let Some(previous_id) = moved_from {
            if let Some(prev) = self.peers.get_mut(&previous_id) {
                prev.player_id = None;
            }
            info!(
                "Player {} moved from peer {} to peer {}",
                player_id, previous_id, peer_id
            );
        }

        let mut released = None;
        if let Some(peer) = self.peers.get_mut(&peer_id) {
            if peer.player_id.as_deref() != Some(player_id) {
                released = peer.player_id.replace(player_id.to_string());
            }
        }
        if let Some(old) = &released {
            info!("Peer {} switched from player {} to {}", peer_id, old, player_id);
        }

        Binding {
            moved_from,
            released,
        }
    }

    pub fn peer_for_player(&self, player_id: &str) -> Option<u32> {
        self.peers
            .values()
            .find(|peer| peer.player_id.as_deref() == Some(player_id))
            .map(|peer| peer.id)
    }

    /// Removes peers that have been silent longer than the timeout and returns them
    pub fn check_timeouts(&mut self) -> Vec<Peer> {
        let timed_out: Vec<u32> = self
            .peers
            .values()
            .filter(|peer| peer.is_timed_out(self.timeout))
            .map(|peer| peer.id)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|peer_id| self.remove_peer(peer_id))
            .collect()
    }

    /// All peer addresses, ordered by peer id
    pub fn peer_addrs(&self) -> Vec<(u32, SocketAddr)> {
        let mut addrs: Vec<(u32, SocketAddr)> = self
            .peers
            .values()
            .map(|peer| (peer.id, peer.addr))
            .collect();
        addrs.sort_unstable_by_key(|(id, _)| *id);
        addrs
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
