//! # Wildcat - Distributed BBS for Meshtastic Networks
//!
//! Wildcat is a bulletin board and mail system for Meshtastic mesh networks with
//! no central server. Every station keeps its own copy of bulletins, private mail,
//! and a channel directory, and replicates record changes to a configured set of
//! peer stations so that all copies eventually converge.
//!
//! ## Features
//!
//! - **Bulletin Boards**: Four fixed boards (General, Info, News, Urgent) with
//!   multi-message compose flows tuned for small LoRa frames.
//! - **Private Mail**: Short-name addressed mail with recipient notification and
//!   recipient-only read/delete enforcement.
//! - **Channel Directory**: A shared, append-only directory of channel URLs/PSKs.
//! - **Peer Replication**: Fire-and-forget, one-hop sync of creates and deletes
//!   to every configured peer BBS node, keyed by a globally unique record id.
//! - **Quick Commands**: Single-message `SM,,`/`PB,,`/`CB,,`/`CHP|` commands that
//!   bypass the menu system entirely.
//! - **Mesh Utilities**: Node/signal statistics, propagation analysis from the
//!   message log, weather lookups, trivia, and a fortune file.
//! - **Async Design**: Built with Tokio; replies never wait on peer delivery.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wildcat::config::Config;
//! use wildcat::bbs::BbsServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let mut server = BbsServer::new(config)?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`bbs`] - Server loop, per-sender session flows, and command processing
//! - [`db`] - Record store: bulletins, mail, channels, and the message log
//! - [`sync`] - Replication messages and peer fan-out
//! - [`mesh`] - Transport seam: inbound events, outbound messages, node directory
//! - [`config`] - Configuration management
//!
//! ## Architecture
//!
//! ```text
//! inbound text ──→ ┌─────────────────┐
//!                  │   BBS Server    │ ← sessions, command routing
//!                  └─────────────────┘
//!                     │           │
//!            ┌────────────┐  ┌────────────┐
//!            │ Record     │  │ Replication│ ──→ peer BBS nodes
//!            │ Store      │←─│ Fan-out    │
//!            └────────────┘  └────────────┘
//! ```
//!
//! The radio transport itself is an external collaborator: the server consumes a
//! stream of [`mesh::TextEvent`]s and emits [`mesh::OutgoingMessage`]s over a
//! channel pair supplied by the embedding application.

pub mod bbs;
pub mod config;
pub mod db;
pub mod logutil;
pub mod mesh;
pub mod sync;
