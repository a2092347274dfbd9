//! # Mesh Transport Seam
//!
//! The radio link itself (serial framing, LoRa scheduling, acknowledgments) is an
//! external collaborator. This module defines the surface the BBS core talks to:
//!
//! - [`TextEvent`] - one inbound text message with signal-quality metadata
//! - [`OutgoingMessage`] - one outbound direct message or broadcast
//! - [`NodeDirectory`] - the set of mesh nodes currently known to the station,
//!   maintained from transport callbacks (node info, telemetry, position)
//!
//! The server consumes an `mpsc` stream of [`TextEvent`]s and pushes
//! [`OutgoingMessage`]s to an unbounded sender; delivery is fire-and-forget and
//! nothing in the core ever blocks on the radio.

use std::collections::HashMap;

/// Reserved destination for network-wide announcements.
pub const BROADCAST_ID: &str = "^all";

/// One inbound text message delivered by the transport.
#[derive(Debug, Clone)]
pub struct TextEvent {
    /// Stable node identity of the sender (e.g. "!4e1a832c").
    pub from: String,
    /// Destination node id, or [`BROADCAST_ID`] for channel traffic.
    pub to: String,
    pub channel: u32,
    pub content: String,
    /// True when the message was addressed to us directly.
    pub is_direct: bool,
    pub snr: Option<f64>,
    pub rssi: Option<i64>,
    pub hop_limit: Option<u32>,
}

impl TextEvent {
    /// Convenience constructor for a direct message with no radio metadata.
    pub fn direct(from: &str, to: &str, content: &str) -> Self {
        TextEvent {
            from: from.to_string(),
            to: to.to_string(),
            channel: 0,
            content: content.to_string(),
            is_direct: true,
            snr: None,
            rssi: None,
            hop_limit: None,
        }
    }
}

/// One outbound message. `to: None` is a broadcast on `channel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: Option<String>,
    pub channel: u32,
    pub content: String,
}

impl OutgoingMessage {
    pub fn direct(to: &str, channel: u32, content: String) -> Self {
        OutgoingMessage {
            to: Some(to.to_string()),
            channel,
            content,
        }
    }

    pub fn broadcast(channel: u32, content: String) -> Self {
        OutgoingMessage {
            to: None,
            channel,
            content,
        }
    }
}

/// Metadata for a single mesh node, as last reported by the transport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInfo {
    pub id: String,
    pub short_name: String,
    pub long_name: String,
    pub hw_model: Option<String>,
    pub role: Option<String>,
    /// Unix seconds of the last packet heard from this node.
    pub last_heard: Option<i64>,
    pub snr: Option<f64>,
    pub battery_level: Option<u32>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// All mesh nodes currently known to this station, keyed by node id.
///
/// The directory is the lookup source for short-name resolution when composing
/// mail and for the stats/network-info menus. It is fed by the transport layer;
/// the BBS core only reads it (plus an `observe` hook that refreshes
/// `last_heard`/`snr` from inbound traffic).
#[derive(Debug, Default)]
pub struct NodeDirectory {
    nodes: HashMap<String, NodeInfo>,
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a node record.
    pub fn upsert(&mut self, info: NodeInfo) {
        self.nodes.insert(info.id.clone(), info);
    }

    /// Refresh liveness metadata from an inbound packet without disturbing
    /// the rest of the record.
    pub fn observe(&mut self, node_id: &str, snr: Option<f64>, heard_at: i64) {
        let entry = self.nodes.entry(node_id.to_string()).or_insert_with(|| NodeInfo {
            id: node_id.to_string(),
            ..NodeInfo::default()
        });
        entry.last_heard = Some(heard_at);
        if snr.is_some() {
            entry.snr = snr;
        }
    }

    pub fn get(&self, node_id: &str) -> Option<&NodeInfo> {
        self.nodes.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }

    /// All nodes whose short name matches, case-insensitively. Short names on
    /// a mesh are not unique; callers must handle 0, 1, or N results.
    pub fn find_by_short_name(&self, short: &str) -> Vec<&NodeInfo> {
        let needle = short.to_lowercase();
        let mut found: Vec<&NodeInfo> = self
            .nodes
            .values()
            .filter(|n| n.short_name.to_lowercase() == needle)
            .collect();
        // Deterministic candidate ordering for the pick-by-index prompt.
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Long display name for a node, falling back to "Node <id>".
    pub fn display_name(&self, node_id: &str) -> String {
        match self.nodes.get(node_id) {
            Some(n) if !n.long_name.is_empty() => n.long_name.clone(),
            _ => format!("Node {}", node_id),
        }
    }

    /// Short display name for a node, falling back to "Node <id>".
    pub fn short_name(&self, node_id: &str) -> String {
        match self.nodes.get(node_id) {
            Some(n) if !n.short_name.is_empty() => n.short_name.clone(),
            _ => format!("Node {}", node_id),
        }
    }

    /// Count of nodes heard within the last `window_secs` (all nodes when None).
    pub fn seen_within(&self, now: i64, window_secs: Option<i64>) -> usize {
        match window_secs {
            None => self.nodes.len(),
            Some(secs) => self
                .nodes
                .values()
                .filter(|n| n.last_heard.map(|h| h >= now - secs).unwrap_or(false))
                .count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, short: &str, long: &str) -> NodeInfo {
        NodeInfo {
            id: id.to_string(),
            short_name: short.to_string(),
            long_name: long.to_string(),
            ..NodeInfo::default()
        }
    }

    #[test]
    fn short_name_lookup_is_case_insensitive_and_sorted() {
        let mut dir = NodeDirectory::new();
        dir.upsert(node("!bb", "BOB", "Bob Base"));
        dir.upsert(node("!aa", "bob", "Bob Mobile"));
        dir.upsert(node("!cc", "eve", "Eve"));

        let hits = dir.find_by_short_name("Bob");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "!aa");
        assert_eq!(hits[1].id, "!bb");
        assert!(dir.find_by_short_name("mallory").is_empty());
    }

    #[test]
    fn display_name_falls_back_to_node_id() {
        let mut dir = NodeDirectory::new();
        dir.upsert(node("!aa", "bob", "Bob Mobile"));
        assert_eq!(dir.display_name("!aa"), "Bob Mobile");
        assert_eq!(dir.display_name("!zz"), "Node !zz");
    }

    #[test]
    fn observe_tracks_liveness_windows() {
        let mut dir = NodeDirectory::new();
        dir.observe("!aa", Some(7.5), 1_000);
        dir.observe("!bb", None, 4_000);

        assert_eq!(dir.seen_within(4_000, None), 2);
        assert_eq!(dir.seen_within(4_000, Some(600)), 1);
        assert_eq!(dir.get("!aa").unwrap().snr, Some(7.5));
    }
}
