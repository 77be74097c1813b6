//! # Orb Arena Client Library
//!
//! Client side of the arena: sends the local player's intent to the server and
//! turns the server's snapshot stream into a smooth, continuously queryable
//! view of every player.
//!
//! ## Architecture Overview
//!
//! Snapshots arrive every 25 ms over UDP and may be lost, delayed or arrive
//! out of order. Consumers such as a renderer poll at their own, usually
//! higher, rate. The client bridges the two by keeping a short history per
//! entity and interpolating between its two newest samples.
//!
//! ### State Buffer (`buffer`)
//! - Previous/current observation per player, with arrival time
//! - Linear position blending over a 0.10 s window
//! - Shortest-path angle blending across the +/-PI seam
//! - Score pulse and particle burst effects advanced on every query
//!
//! ### Session (`session`)
//! - Tick watermark that discards reordered snapshots
//! - Game over and reset handling
//! - Local player events (boost used, orb collected)
//!
//! ### Input (`input`)
//! - Send-rate cap of one input per server tick, with latched boost
//! - Pluggable intent sources; [`input::OrbPilot`] plays headless
//!
//! ### Network (`network`)
//! - UDP socket, receiver task and chaos-aware send path
//! - Main loop that polls input, applies snapshots and reports progress
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("127.0.0.1:9050", "pilot-0001");
//!     let mut client = Client::new(config).await?;
//!
//!     // Shares the buffer with any other consumer
//!     let buffer = client.buffer();
//!     client.run().await?;
//!
//!     for entity in buffer.query_all(0.0) {
//!         println!("{} at ({}, {})", entity.id, entity.pose.x, entity.pose.y);
//!     }
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod input;
pub mod network;
pub mod session;
