//! # BBS Core Module
//!
//! This module implements the interactive side of the system: the server event
//! loop, per-sender session flows, and command processing.
//!
//! ## Components
//!
//! - [`server`] - Main server: event routing, sessions, sync apply, outbox
//! - [`session`] - Per-sender flow state (a sum type over {command, step})
//! - [`commands`] - Top-level router, quick commands, and flow step handlers
//! - [`games`] - Trivia, fortunes, and the propagation calculator
//! - [`weather`] - OpenWeatherMap lookups (feature `weather`)
//!
//! ## Conversation model
//!
//! Users drive the BBS with short direct messages. A sender with no live
//! session hits the top-level vocabulary (menus and quick commands); starting
//! a flow writes a session, and each following message advances it one step.
//! A new top-level command silently replaces a mid-flow session, and idle
//! sessions are swept after a configurable timeout.
//!
//! Every store mutation committed by a flow also goes through the replication
//! fan-out in [`crate::sync`], so peer stations converge on the same records.

pub mod commands;
pub mod games;
pub mod server;
pub mod session;
#[cfg(feature = "weather")]
pub mod weather;

pub use server::BbsServer;
