//! # Per-Sender Session State
//!
//! One [`Session`] exists per sending node while that node is mid-flow. The
//! session is short-lived per-turn memory, not durable history: it is created
//! when a top-level command starts a flow, replaced wholesale on every
//! transition, and dropped on completion, cancellation, error, or idle
//! expiry. Losing a session only forces the sender to restart the current
//! flow, so it lives in the server's in-memory map and is never replicated.
//!
//! The flow itself is a sum type over {command kind, step} so that illegal
//! step/field combinations cannot be represented: a mail compose step always
//! carries its target and accumulated body, a bulletin read step always knows
//! its board, and so on. The only free-form accumulators are the compose
//! bodies and the candidate/selection lists captured when a menu was printed.

use chrono::{DateTime, Utc};

use crate::db::{Bulletin, ChannelEntry, MailRecord};
use crate::mesh::NodeInfo;

/// Where a composed mail message is headed: either a node picked during the
/// flow, or the sender of the mail being replied to (resolved at commit time).
#[derive(Debug, Clone, PartialEq)]
pub enum ComposeTarget {
    Node(String),
    ReplyTo(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MailStep {
    /// \[R]ead  \[S]end  E\[X]IT
    Action,
    /// Inbox was listed; awaiting a numeric message id.
    SelectMessage,
    /// Awaiting the recipient's short name.
    AwaitShortName,
    /// A message was displayed; \[K]eep  \[D]elete  \[R]eply.
    MessageAction { mail: MailRecord },
    /// Several nodes share the short name; awaiting a candidate index.
    SelectRecipient { candidates: Vec<NodeInfo> },
    /// Awaiting the subject line.
    AwaitSubject { recipient: String },
    /// Accumulating body lines until END.
    ComposeBody {
        target: ComposeTarget,
        subject: String,
        body: String,
    },
    /// Mail was just sent; `y` reopens the mail menu.
    SendAnother,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BulletinStep {
    /// Awaiting a board letter or index.
    BoardSelect,
    /// \[R]ead  \[P]ost on the chosen board.
    BoardAction { board: String },
    /// Board listing shown; awaiting a numeric bulletin id.
    ReadSelect { board: String },
    /// Awaiting the subject line.
    AwaitSubject { board: String },
    /// Accumulating body lines until END.
    ComposeBody {
        board: String,
        subject: String,
        body: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelStep {
    /// \[V]iew  \[P]ost  E\[X]IT
    Action,
    /// Directory listed; awaiting a numeric index.
    ViewSelect { channels: Vec<ChannelEntry> },
    /// Awaiting the channel name.
    AwaitName,
    /// Awaiting the URL or PSK.
    AwaitUrl { name: String },
}

/// The active flow for one sender. Each variant is one command kind; step
/// data lives inside the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Top-level menu shown by HELP; \[B]BS \[U]tilities \[Q]uick E\[X]IT.
    MainMenu,
    /// BBS submenu; \[M]ail \[B]ulletins \[C]hannel Dir E\[X]IT.
    BbsMenu,
    /// Utilities submenu; stats/network/resources/weather/games/fortune.
    UtilitiesMenu,
    Mail(MailStep),
    Bulletin(BulletinStep),
    ChannelDirectory(ChannelStep),
    /// Stats menu awaiting a category choice.
    Stats,
    /// Propagation analysis submenu.
    PropagationAnalysis,
    /// Awaiting a node short name for the reliability report.
    PropagationNodeInput,
    /// Network info menu awaiting a choice.
    NetworkInfo,
    /// Resources menu awaiting a choice.
    Resources,
    /// Awaiting a ZIP code for the weather lookup.
    Weather,
    /// Games menu awaiting a choice.
    Games,
    /// A trivia question is outstanding.
    Trivia { answer: String },
    /// Awaiting an antenna height for the range estimate.
    PropagationCalc,
    /// Quick-command CM listed the inbox; awaiting a 1-based number.
    CheckMail { inbox: Vec<MailRecord> },
    /// Quick-command CB listed a board; awaiting a 1-based number.
    CheckBulletin { bulletins: Vec<Bulletin> },
    /// Quick-command CH listed the directory; awaiting a 1-based number.
    CheckChannel { channels: Vec<ChannelEntry> },
}

/// Live conversation state for one sender.
#[derive(Debug, Clone)]
pub struct Session {
    pub node_id: String,
    pub flow: Flow,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(node_id: &str, flow: Flow) -> Self {
        let now = Utc::now();
        Session {
            node_id: node_id.to_string(),
            flow,
            started_at: now,
            last_activity: now,
        }
    }

    /// Replace the flow, refreshing the activity timestamp.
    pub fn transition(&mut self, flow: Flow) {
        self.flow = flow;
        self.last_activity = Utc::now();
    }

    /// True when the session has been idle longer than the timeout and should
    /// be swept, returning the sender to the top-level vocabulary.
    pub fn is_idle(&self, timeout_minutes: i64) -> bool {
        Utc::now() - self.last_activity > chrono::Duration::minutes(timeout_minutes)
    }
}

/// Canonical input normalization applied before choice dispatch: trim,
/// lowercase, and collapse a two-character input ending in `x` to its first
/// character (so `rx` means `r`, letting users bolt an exit-style suffix onto
/// any single-letter choice).
pub fn normalize_choice(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let mut chars = lowered.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(first), Some('x'), None) => first.to_string(),
        _ => lowered,
    }
}
