//! # Replication Fan-out
//!
//! Keeps peer BBS stations converged by mirroring every locally-committed
//! create/delete to the configured `bbs_nodes` peer set. The design is
//! deliberately minimal for a lossy, low-bandwidth radio link:
//!
//! - **Fire-and-forget**: one direct message per peer, no acknowledgment, no
//!   retry, no ordering guarantee between sync messages.
//! - **One hop**: a peer applies what it receives but never re-propagates it.
//!   Reflection storms are impossible, at the cost that every node must list
//!   every other node in its peer set for full convergence.
//! - **Keyed by `unique_id`**: the store-local rowid never crosses the air;
//!   duplicate applies and out-of-order deletes are absorbed by the store.
//!
//! The wire encoding is a single text payload: a kind tag, then `|`-separated
//! fields with the free-text content last so it may itself contain the
//! delimiter. Parsing uses bounded `splitn` for the same reason.

use log::{debug, warn};

use crate::db::{Store, StoreError};
use crate::mesh::OutgoingMessage;

/// One replicated create/delete operation, as carried between peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    BulletinCreate {
        unique_id: String,
        board: String,
        sender_short_name: String,
        date: String,
        subject: String,
        content: String,
    },
    BulletinDelete {
        unique_id: String,
    },
    MailCreate {
        unique_id: String,
        sender: String,
        sender_short_name: String,
        recipient: String,
        date: String,
        subject: String,
        content: String,
    },
    MailDelete {
        unique_id: String,
    },
    ChannelCreate {
        name: String,
        url: String,
    },
}

const TAG_BULLETIN: &str = "BULLETIN";
const TAG_DELETE_BULLETIN: &str = "DELETE_BULLETIN";
const TAG_MAIL: &str = "MAIL";
const TAG_DELETE_MAIL: &str = "DELETE_MAIL";
const TAG_CHANNEL: &str = "CHANNEL";

impl SyncMessage {
    /// Encode for transmission. The inverse of [`SyncMessage::parse`].
    pub fn encode(&self) -> String {
        match self {
            SyncMessage::BulletinCreate {
                unique_id,
                board,
                sender_short_name,
                date,
                subject,
                content,
            } => format!(
                "{}|{}|{}|{}|{}|{}|{}",
                TAG_BULLETIN, unique_id, board, sender_short_name, date, subject, content
            ),
            SyncMessage::BulletinDelete { unique_id } => {
                format!("{}|{}", TAG_DELETE_BULLETIN, unique_id)
            }
            SyncMessage::MailCreate {
                unique_id,
                sender,
                sender_short_name,
                recipient,
                date,
                subject,
                content,
            } => format!(
                "{}|{}|{}|{}|{}|{}|{}|{}",
                TAG_MAIL, unique_id, sender, sender_short_name, recipient, date, subject, content
            ),
            SyncMessage::MailDelete { unique_id } => format!("{}|{}", TAG_DELETE_MAIL, unique_id),
            SyncMessage::ChannelCreate { name, url } => {
                format!("{}|{}|{}", TAG_CHANNEL, name, url)
            }
        }
    }

    /// Parse a received payload. Returns `None` for anything that is not a
    /// well-formed sync message so ordinary peer chatter falls through to the
    /// normal command path.
    pub fn parse(text: &str) -> Option<SyncMessage> {
        let (tag, rest) = text.split_once('|')?;
        match tag {
            TAG_BULLETIN => {
                let mut parts = rest.splitn(6, '|');
                let unique_id = parts.next()?;
                let board = parts.next()?;
                let sender_short_name = parts.next()?;
                let date = parts.next()?;
                let subject = parts.next()?;
                let content = parts.next()?;
                Some(SyncMessage::BulletinCreate {
                    unique_id: unique_id.to_string(),
                    board: board.to_string(),
                    sender_short_name: sender_short_name.to_string(),
                    date: date.to_string(),
                    subject: subject.to_string(),
                    content: content.to_string(),
                })
            }
            TAG_DELETE_BULLETIN => {
                if rest.is_empty() {
                    return None;
                }
                Some(SyncMessage::BulletinDelete {
                    unique_id: rest.to_string(),
                })
            }
            TAG_MAIL => {
                let mut parts = rest.splitn(7, '|');
                let unique_id = parts.next()?;
                let sender = parts.next()?;
                let sender_short_name = parts.next()?;
                let recipient = parts.next()?;
                let date = parts.next()?;
                let subject = parts.next()?;
                let content = parts.next()?;
                Some(SyncMessage::MailCreate {
                    unique_id: unique_id.to_string(),
                    sender: sender.to_string(),
                    sender_short_name: sender_short_name.to_string(),
                    recipient: recipient.to_string(),
                    date: date.to_string(),
                    subject: subject.to_string(),
                    content: content.to_string(),
                })
            }
            TAG_DELETE_MAIL => {
                if rest.is_empty() {
                    return None;
                }
                Some(SyncMessage::MailDelete {
                    unique_id: rest.to_string(),
                })
            }
            TAG_CHANNEL => {
                let (name, url) = rest.split_once('|')?;
                Some(SyncMessage::ChannelCreate {
                    name: name.to_string(),
                    url: url.to_string(),
                })
            }
            _ => None,
        }
    }

    /// Short description for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::BulletinCreate { .. } => "bulletin-create",
            SyncMessage::BulletinDelete { .. } => "bulletin-delete",
            SyncMessage::MailCreate { .. } => "mail-create",
            SyncMessage::MailDelete { .. } => "mail-delete",
            SyncMessage::ChannelCreate { .. } => "channel-create",
        }
    }
}

/// Apply a sync message received from a peer to the local store.
///
/// The embedded `unique_id` is passed through unchanged; duplicate creates and
/// deletes of absent records are no-ops at the store boundary, so applying the
/// same message twice (or a delete before its create) leaves the store
/// consistent. Never re-broadcasts.
pub fn apply(store: &Store, msg: &SyncMessage) -> Result<(), StoreError> {
    match msg {
        SyncMessage::BulletinCreate {
            unique_id,
            board,
            sender_short_name,
            date,
            subject,
            content,
        } => {
            store.create_bulletin(
                board,
                sender_short_name,
                subject,
                content,
                Some(unique_id),
                Some(date),
            )?;
        }
        SyncMessage::BulletinDelete { unique_id } => {
            if !store.delete_bulletin_by_uid(unique_id)? {
                debug!("delete for unknown bulletin {} ignored", unique_id);
            }
        }
        SyncMessage::MailCreate {
            unique_id,
            sender,
            sender_short_name,
            recipient,
            date,
            subject,
            content,
        } => {
            store.create_mail(
                sender,
                sender_short_name,
                recipient,
                subject,
                content,
                Some(unique_id),
                Some(date),
            )?;
        }
        SyncMessage::MailDelete { unique_id } => {
            if !store.delete_mail_by_uid(unique_id)? {
                debug!("delete for unknown mail {} ignored", unique_id);
            }
        }
        SyncMessage::ChannelCreate { name, url } => {
            store.add_channel(name, url)?;
        }
    }
    Ok(())
}

/// Fans locally-committed operations out to the configured peer set.
#[derive(Debug, Clone)]
pub struct Replicator {
    peers: Vec<String>,
    channel: u32,
}

impl Replicator {
    pub fn new(peers: Vec<String>, channel: u32) -> Self {
        Replicator { peers, channel }
    }

    /// True when `node_id` is a configured peer BBS node. Inbound messages
    /// from peers are tried as sync payloads before normal command routing.
    pub fn is_peer(&self, node_id: &str) -> bool {
        self.peers.iter().any(|p| p == node_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Queue one copy of `msg` for every peer. Queuing never blocks and the
    /// caller's reply to the originating user does not wait on any of this.
    pub fn fan_out(&self, msg: &SyncMessage, out: &mut Vec<OutgoingMessage>) {
        if self.peers.is_empty() {
            return;
        }
        let payload = msg.encode();
        for peer in &self.peers {
            out.push(OutgoingMessage::direct(peer, self.channel, payload.clone()));
        }
        debug!("queued {} sync to {} peer(s)", msg.kind(), self.peers.len());
    }
}

/// Log-and-continue wrapper for replica applies; a malformed or failing apply
/// must never take down the dispatch loop.
pub fn apply_from_peer(store: &Store, peer: &str, msg: &SyncMessage) {
    match apply(store, msg) {
        Ok(()) => debug!("applied {} from peer {}", msg.kind(), peer),
        Err(e) => warn!("failed to apply {} from peer {}: {}", msg.kind(), peer, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_round_trip_preserves_delimiters_in_content() {
        let msg = SyncMessage::BulletinCreate {
            unique_id: "u-1".into(),
            board: "General".into(),
            sender_short_name: "AB1".into(),
            date: "2026-08-08 12:00".into(),
            subject: "meeting".into(),
            content: "pipes | in | body\nsecond line".into(),
        };
        let parsed = SyncMessage::parse(&msg.encode()).expect("parse");
        assert_eq!(parsed, msg);
    }

    #[test]
    fn mail_round_trip() {
        let msg = SyncMessage::MailCreate {
            unique_id: "u-2".into(),
            sender: "!aa".into(),
            sender_short_name: "AB1".into(),
            recipient: "!bb".into(),
            date: "2026-08-08 12:00".into(),
            subject: "Re: hi".into(),
            content: "line one\nline two\n".into(),
        };
        assert_eq!(SyncMessage::parse(&msg.encode()), Some(msg));
    }

    #[test]
    fn non_sync_chatter_does_not_parse() {
        assert_eq!(SyncMessage::parse("hello there"), None);
        assert_eq!(SyncMessage::parse("MAILBOX|full"), None);
        assert_eq!(SyncMessage::parse("BULLETIN|too|few|fields"), None);
        assert_eq!(SyncMessage::parse("DELETE_MAIL|"), None);
    }

    #[test]
    fn fan_out_sends_one_copy_per_peer() {
        let repl = Replicator::new(vec!["!p1".into(), "!p2".into()], 0);
        let mut out = Vec::new();
        repl.fan_out(
            &SyncMessage::MailDelete {
                unique_id: "u-3".into(),
            },
            &mut out,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].to.as_deref(), Some("!p1"));
        assert_eq!(out[1].to.as_deref(), Some("!p2"));
        assert_eq!(out[0].content, "DELETE_MAIL|u-3");
    }
}
