//! # BBS Server - Core Application Controller
//!
//! The [`BbsServer`] coordinates every component: it consumes inbound
//! [`TextEvent`]s from the transport, routes them to the per-sender session
//! machine or the top-level command router, applies peer sync traffic to the
//! record store, and flushes the turn's outbound messages.
//!
//! ## Event handling order
//!
//! 1. Log the message into `message_logs` and refresh the node directory's
//!    liveness metadata.
//! 2. If the sender is a configured peer BBS node and the payload parses as a
//!    sync message, apply it to the store and stop - sync traffic never gets a
//!    reply and is never re-broadcast.
//! 3. Otherwise, direct messages drive the sender's session: the current flow
//!    is taken out of the session map, advanced against the raw text, and the
//!    returned flow (if any) becomes the sender's new session. Broadcast
//!    chatter is logged but not interpreted.
//!
//! Different senders are independent; messages from one sender are processed
//! strictly in arrival order by the single server loop. Replies and peer
//! fan-out are queued to the outbound channel after the turn completes, so the
//! user-visible reply never waits on peer delivery.
//!
//! ## Error policy
//!
//! A handler error is caught here at the routing boundary: it is logged, the
//! sender receives a generic processing-error reply, and the session is
//! dropped. No error in the dispatch path is fatal to the process.

use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::config::Config;
use crate::db::{LogEntry, Store};
use crate::logutil::escape_log;
use crate::mesh::{NodeDirectory, OutgoingMessage, TextEvent};
use crate::sync::{self, Replicator, SyncMessage};

use super::commands::{CommandProcessor, TurnContext};
use super::session::{Flow, Session};
#[cfg(feature = "weather")]
use super::weather::WeatherService;

const PROCESSING_ERROR: &str = "⚠️ Error processing your request. Please try again.";

/// Seconds between idle-session sweeps.
const SWEEP_INTERVAL_SECS: u64 = 60;

pub struct BbsServer {
    config: Config,
    store: Store,
    sessions: HashMap<String, Session>,
    nodes: NodeDirectory,
    replicator: Replicator,
    processor: CommandProcessor,
    #[cfg(feature = "weather")]
    weather: WeatherService,
    event_rx: Option<mpsc::UnboundedReceiver<TextEvent>>,
    outgoing_tx: Option<mpsc::UnboundedSender<OutgoingMessage>>,
    /// Every outbound message this server produced, kept for assertions when
    /// running without a transport (tests, status tooling).
    test_messages: Vec<OutgoingMessage>,
}

impl BbsServer {
    /// Create a server, opening the record store at the configured path.
    pub fn new(config: Config) -> Result<Self> {
        let store = Store::open(&config.storage.db_path)?;
        Ok(Self::with_store(config, store))
    }

    /// Create a server around an existing store (used by tests to run against
    /// an in-memory database).
    pub fn with_store(config: Config, store: Store) -> Self {
        let replicator = Replicator::new(
            config.mesh.bbs_nodes.clone(),
            config.mesh.channel as u32,
        );
        #[cfg(feature = "weather")]
        let weather = WeatherService::new(config.weather.clone());
        BbsServer {
            store,
            sessions: HashMap::new(),
            nodes: NodeDirectory::new(),
            replicator,
            processor: CommandProcessor::new(),
            #[cfg(feature = "weather")]
            weather,
            event_rx: None,
            outgoing_tx: None,
            test_messages: Vec::new(),
            config,
        }
    }

    /// Wire up the transport collaborator: an inbound event stream and an
    /// outbound message sink.
    pub fn attach_transport(
        &mut self,
        event_rx: mpsc::UnboundedReceiver<TextEvent>,
        outgoing_tx: mpsc::UnboundedSender<OutgoingMessage>,
    ) {
        self.event_rx = Some(event_rx);
        self.outgoing_tx = Some(outgoing_tx);
    }

    /// Run the event loop until the transport closes its inbound stream.
    pub async fn run(&mut self) -> Result<()> {
        let mut sweep = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        let mut event_rx = match self.event_rx.take() {
            Some(rx) => rx,
            None => {
                warn!("no transport attached; serving nothing until one is provided");
                loop {
                    sweep.tick().await;
                    self.sweep_idle_sessions();
                }
            }
        };
        info!("BBS server loop started ({} peer nodes)", self.replicator.peer_count());
        loop {
            tokio::select! {
                event = event_rx.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            error!("event handling failed: {}", e);
                        }
                    }
                    None => {
                        info!("transport closed inbound stream; shutting down");
                        break;
                    }
                },
                _ = sweep.tick() => self.sweep_idle_sessions(),
            }
        }
        Ok(())
    }

    /// Handle one inbound event end-to-end. Public so embedders and tests can
    /// drive the server without a live radio.
    pub async fn handle_event(&mut self, event: TextEvent) -> Result<()> {
        let now = Utc::now().timestamp();
        let entry = LogEntry {
            timestamp: now,
            sender_id: event.from.clone(),
            sender_short_name: self.nodes.short_name(&event.from),
            to_id: event.to.clone(),
            channel_index: event.channel as i64,
            message: event.content.clone(),
            snr: event.snr,
            rssi: event.rssi,
            hop_limit: event.hop_limit.map(|h| h as i64),
        };
        if let Err(e) = self.store.log_message(&entry) {
            warn!("failed to log message from {}: {}", event.from, e);
        }
        self.nodes.observe(&event.from, event.snr, now);

        // Peer sync traffic is applied and never answered or re-broadcast.
        if self.replicator.is_peer(&event.from) {
            if let Some(msg) = SyncMessage::parse(&event.content) {
                sync::apply_from_peer(&self.store, &event.from, &msg);
                return Ok(());
            }
        }

        if !event.is_direct {
            debug!(
                "ignoring channel traffic from {}: {}",
                event.from,
                escape_log(&event.content)
            );
            return Ok(());
        }

        self.process_direct(&event.from, &event.content).await
    }

    async fn process_direct(&mut self, sender: &str, raw: &str) -> Result<()> {
        debug!("processing '{}' from {}", escape_log(raw), sender);
        let prior = self.sessions.remove(sender).map(|s| s.flow);
        let mut out = Vec::new();
        let result = {
            let mut ctx = TurnContext {
                store: &self.store,
                replicator: &self.replicator,
                nodes: &self.nodes,
                config: &self.config,
                #[cfg(feature = "weather")]
                weather: &mut self.weather,
                out: &mut out,
            };
            self.processor.advance(sender, raw, prior, &mut ctx).await
        };
        match result {
            Ok(Some(flow)) => {
                self.sessions.insert(sender.to_string(), Session::new(sender, flow));
            }
            Ok(None) => {}
            Err(e) => {
                // Reset rather than leave a half-applied transition; the
                // session map entry was already taken out above.
                error!("error processing message from {}: {}", sender, e);
                out.push(OutgoingMessage::direct(
                    sender,
                    self.config.mesh.channel as u32,
                    PROCESSING_ERROR.to_string(),
                ));
            }
        }
        self.flush(out);
        Ok(())
    }

    fn flush(&mut self, out: Vec<OutgoingMessage>) {
        for msg in out {
            if let Some(tx) = &self.outgoing_tx {
                if tx.send(msg.clone()).is_err() {
                    warn!("outgoing channel closed; dropping message");
                }
            } else {
                debug!(
                    "mock send (no transport) to {:?}: {}",
                    msg.to,
                    escape_log(&msg.content)
                );
            }
            self.test_messages.push(msg);
        }
    }

    /// Drop sessions idle past the configured timeout, silently returning
    /// those senders to the top-level vocabulary.
    pub fn sweep_idle_sessions(&mut self) {
        let timeout = self.config.session.timeout_minutes as i64;
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_idle(timeout));
        let swept = before - self.sessions.len();
        if swept > 0 {
            info!("expired {} idle session(s)", swept);
        }
    }

    /// Print a summary of this station to stdout.
    pub fn show_status(&self) -> Result<()> {
        println!("=== {} ===", self.config.bbs.name);
        println!("Node id:   {}", self.config.mesh.node_id);
        println!("Channel:   {}", self.config.mesh.channel);
        println!("Peers:     {}", self.replicator.peer_count());
        println!("Bulletins: {}", self.store.bulletin_count()?);
        println!("Mail:      {}", self.store.mail_count()?);
        println!("Channels:  {}", self.store.channel_count()?);
        println!("Sessions:  {}", self.sessions.len());
        Ok(())
    }

    // ---- Accessors (embedding, tests) --------------------------------------

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn nodes(&self) -> &NodeDirectory {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut NodeDirectory {
        &mut self.nodes
    }

    /// The live flow for a sender, if any. `None` means "no session": the
    /// next message from that sender hits the top-level router.
    pub fn active_flow(&self, node_id: &str) -> Option<&Flow> {
        self.sessions.get(node_id).map(|s| &s.flow)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// All outbound messages produced so far (oldest first).
    pub fn sent_messages(&self) -> &[OutgoingMessage] {
        &self.test_messages
    }

    /// Drain the recorded outbound messages.
    pub fn take_sent(&mut self) -> Vec<OutgoingMessage> {
        std::mem::take(&mut self.test_messages)
    }

    /// Test hook: age a session's activity stamp backwards so idle-sweep
    /// behavior can be exercised without waiting on wall-clock time.
    #[doc(hidden)]
    pub fn backdate_session(&mut self, node_id: &str, minutes: i64) {
        if let Some(session) = self.sessions.get_mut(node_id) {
            session.last_activity = session.last_activity - chrono::Duration::minutes(minutes);
        }
    }
}
