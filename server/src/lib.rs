//! # Orb Arena Server Library
//!
//! Authoritative server for a small multiplayer arena: players move in a bounded
//! 2D world, collect respawning orbs for score and spend boost charges for a
//! short speed burst. The server owns the canonical world and fans a full
//! snapshot out to every peer on a fixed cadence.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! The [`simulation::SimulationEngine`] applies buffered player intents, moves
//! players, clamps them to the arena, resolves orb pickups and runs the boost
//! lifecycle. It advances in fixed 25 ms steps (40 Hz).
//!
//! ### Connection Tracking
//! The [`registry::ConnectionRegistry`] maps UDP peers to the player ids they
//! drive, enforces the connection limit and removes silent peers.
//!
//! ### State Broadcasting
//! The [`broadcast::StateBroadcaster`] sends every tick's snapshot to every
//! peer. The [`broadcast::ObserverMirror`] forwards the same content to an
//! external observer only when it changed.
//!
//! ## Architecture Design
//!
//! ### Single Writer
//! Datagrams are decoded by a receiver task and pushed onto an inbox channel.
//! The game loop drains that inbox at the start of every tick, so the world is
//! only ever mutated from one place and no lock is needed around it. Outbound
//! datagrams leave through a second channel to a sender task.
//!
//! ### Network Chaos
//! Both directions pass through a shared [`shared::ChaosInjector`], which can
//! drop or delay datagrams for a bounded window to exercise the protocol.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:9050".to_string(),
//!         score_to_win: Some(10),
//!         ..ServerConfig::default()
//!     };
//!
//!     // Runs the 40 Hz loop until Ctrl+C
//!     let mut server = Server::new(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod network;
pub mod registry;
pub mod simulation;
pub mod world;
