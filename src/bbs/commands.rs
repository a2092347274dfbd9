//! Command routing and multi-step flows for the interactive BBS experience.
//!
//! This module contains the state machine that drives every conversation with
//! the station. It is optimized for very small message sizes (≈230 bytes) and
//! low-bandwidth links, so all prompts are intentionally terse.
//!
//! Key ideas:
//! - A sender with no live session hits the top-level router: menu words,
//!   single letters, and the sessionless quick commands (`SM,,`, `CM`,
//!   `PB,,`, `CB,,`, `CHP|`, `CH`).
//! - A sender mid-flow has its raw text interpreted against the current
//!   [Flow] step; every handler returns the replies to queue plus the next
//!   flow (or `None` to end the session).
//! - Every create/delete committed here also goes through the replication
//!   fan-out, and urgent bulletins additionally raise a broadcast notice.
//!
//! The primary entrypoint is [CommandProcessor::advance], which the server
//! calls once per inbound direct message. Handlers never touch the network
//! directly; they push [OutgoingMessage]s into the turn's outbox and the
//! server flushes it after the turn completes.

use anyhow::Result;
use chrono::Utc;
use log::info;
use std::collections::HashMap;

use crate::config::Config;
use crate::db::{resolve_board, Store, StoreError, BOARDS};
use crate::db::{Bulletin, MailRecord};
use crate::mesh::{NodeDirectory, NodeInfo, OutgoingMessage};
use crate::sync::{Replicator, SyncMessage};

use super::games;
use super::session::{
    normalize_choice, BulletinStep, ChannelStep, ComposeTarget, Flow, MailStep,
};
#[cfg(feature = "weather")]
use super::weather::WeatherService;

const MAIL_MENU: &str = "✉️Mail Menu✉️\nWhat would you like to do with mail?\n[R]ead  [S]end  E[X]IT";
const BULLETIN_MENU: &str =
    "📰Bulletin Menu📰\nWhich board would you like to enter?\n[G]eneral  [I]nfo  [N]ews  [U]rgent";
const CHANNEL_MENU: &str =
    "📚CHANNEL DIRECTORY📚\nWhat would you like to do?\n[V]iew  [P]ost  E[X]IT";
const STATS_MENU: &str = "📊Stats Menu📊\n[N]odes  [H]ardware  [R]oles\n[S]NR Leaders  [D]istance\n[C]hannel Activity  [T]op Nodes\n[P]ropagation Analysis\nE[X]IT";
const PROP_MENU: &str =
    "📊 Propagation Analysis 📊\n[H]ourly Trends\n[B]est/Worst Times\n[N]ode Reliability\nE[X]IT";
const NETWORK_MENU: &str =
    "📡Network Info📡\nWhat info would you like?\n[N]odes  [S]ignals  [M]esh Health  E[X]IT";
const RESOURCES_MENU: &str =
    "📚Resources📚\nWhat info do you need?\n[G]uide  [H]ardware  [L]inks  E[X]IT";
const GAMES_MENU: &str =
    "🎮 Games Menu 🎮\nWhat would you like to play?\n[T]rivia  [P]ropagation Calc  E[X]IT";
const WEATHER_PROMPT: &str = "☁️ Weather ☁️\n\nEnter your 5-digit ZIP code:";
const PROP_CALC_PROMPT: &str =
    "📡 Propagation Calculator 📡\n\nEnter antenna height in feet (e.g., 20):";
const QUICK_HELP: &str = "✈️QUICK COMMANDS✈️\nSend command below for usage info:\nSM,, - Send Mail\nCM - Check Mail\nPB,, - Post Bulletin\nCB,, - Check Bulletins\nCHP| - Post Channel\nCH - List Channels";
const EXIT_TEXT: &str = "Type 'HELP' for a list of commands.";

/// Everything a single inbound turn may touch. Built by the server, scoped to
/// the lifetime of one event, and released on every exit path.
pub struct TurnContext<'a> {
    pub store: &'a Store,
    pub replicator: &'a Replicator,
    pub nodes: &'a NodeDirectory,
    pub config: &'a Config,
    #[cfg(feature = "weather")]
    pub weather: &'a mut WeatherService,
    /// Outbound messages queued this turn; the server flushes these after the
    /// handler returns, so replies never wait on the radio.
    pub out: &'a mut Vec<OutgoingMessage>,
}

impl<'a> TurnContext<'a> {
    pub fn reply(&mut self, to: &str, text: &str) {
        self.out.push(OutgoingMessage::direct(
            to,
            self.config.mesh.channel as u32,
            text.to_string(),
        ));
    }

    pub fn broadcast(&mut self, text: &str) {
        self.out.push(OutgoingMessage::broadcast(
            self.config.mesh.channel as u32,
            text.to_string(),
        ));
    }
}

/// Inputs that always route top-level, even mid-flow.
fn preempts_flow(raw: &str) -> bool {
    let upper = raw.trim().to_uppercase();
    upper == "HELP"
        || upper == "?"
        || upper == "CM"
        || upper == "CH"
        || upper.starts_with("SM,,")
        || upper.starts_with("PB,,")
        || upper.starts_with("CB,,")
        || upper.starts_with("CHP|")
}

#[derive(Clone, Copy)]
enum MenuKind {
    Main,
    Bbs,
    Utilities,
}

fn build_menu(items: &[String], title: &str, kind: MenuKind) -> String {
    let mut menu = format!("{}\n", title);
    for item in items {
        let label = match (item.trim().to_uppercase().as_str(), kind) {
            ("B", MenuKind::Main) => Some("[B]BS"),
            ("U", MenuKind::Main) => Some("[U]tilities"),
            ("Q", MenuKind::Main) => Some("[Q]uick Commands"),
            ("M", MenuKind::Bbs) => Some("[M]ail"),
            ("B", MenuKind::Bbs) => Some("[B]ulletins"),
            ("C", MenuKind::Bbs) => Some("[C]hannel Dir"),
            ("S", MenuKind::Utilities) => Some("[S]tats"),
            ("N", MenuKind::Utilities) => Some("[N]etwork Info"),
            ("R", MenuKind::Utilities) => Some("[R]esources"),
            ("W", MenuKind::Utilities) => Some("[W]eather"),
            ("G", MenuKind::Utilities) => Some("[G]ames"),
            ("F", MenuKind::Utilities) => Some("[F]ortune"),
            ("X", _) => Some("E[X]IT"),
            _ => None,
        };
        if let Some(label) = label {
            menu.push_str(label);
            menu.push('\n');
        }
    }
    menu
}

/// Processes inbound text for one sender per turn.
pub struct CommandProcessor;

impl CommandProcessor {
    pub fn new() -> Self {
        CommandProcessor
    }

    /// Interpret `raw` for `sender` against its current flow. Returns the
    /// next flow, or `None` when the conversation ends (the server drops the
    /// session). Replies and replication traffic go through `ctx`.
    pub async fn advance(
        &self,
        sender: &str,
        raw: &str,
        flow: Option<Flow>,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Option<Flow>> {
        // Starting a new top-level command mid-flow silently discards the
        // prior session. Only HELP and the quick commands pre-empt: a new-mail
        // notice tells its recipient to send CM, and that has to work no
        // matter what flow they were left in. Single letters never pre-empt,
        // they belong to the flows.
        if flow.is_some() && preempts_flow(raw) {
            return self.route_top_level(sender, raw, ctx).await;
        }
        match flow {
            None => self.route_top_level(sender, raw, ctx).await,
            Some(Flow::MainMenu) => Ok(self.handle_main_menu(sender, raw, ctx)),
            Some(Flow::BbsMenu) => Ok(self.handle_bbs_menu(sender, raw, ctx)),
            Some(Flow::UtilitiesMenu) => Ok(self.handle_utilities_menu(sender, raw, ctx)),
            Some(Flow::Mail(step)) => self.handle_mail_step(sender, raw, step, ctx),
            Some(Flow::Bulletin(step)) => self.handle_bulletin_step(sender, raw, step, ctx),
            Some(Flow::ChannelDirectory(step)) => self.handle_channel_step(sender, raw, step, ctx),
            Some(Flow::Stats) => self.handle_stats(sender, raw, ctx),
            Some(Flow::PropagationAnalysis) => self.handle_prop_analysis(sender, raw, ctx),
            Some(Flow::PropagationNodeInput) => self.handle_prop_node_input(sender, raw, ctx),
            Some(Flow::NetworkInfo) => Ok(self.handle_network_info(sender, raw, ctx)),
            Some(Flow::Resources) => Ok(self.handle_resources(sender, raw, ctx)),
            Some(Flow::Weather) => self.handle_weather(sender, raw, ctx).await,
            Some(Flow::Games) => Ok(self.handle_games(sender, raw, ctx)),
            Some(Flow::Trivia { answer }) => Ok(self.handle_trivia(sender, raw, &answer, ctx)),
            Some(Flow::PropagationCalc) => Ok(self.handle_prop_calc(sender, raw, ctx)),
            Some(Flow::CheckMail { inbox }) => self.handle_check_mail(sender, raw, inbox, ctx),
            Some(Flow::CheckBulletin { bulletins }) => {
                self.handle_check_bulletin(sender, raw, bulletins, ctx)
            }
            Some(Flow::CheckChannel { channels }) => {
                Ok(self.handle_check_channel(sender, raw, channels, ctx))
            }
        }
    }

    // ---- Top-level routing -------------------------------------------------

    async fn route_top_level(
        &self,
        sender: &str,
        raw: &str,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Option<Flow>> {
        let trimmed = raw.trim();
        let upper = trimmed.to_uppercase();

        // Quick commands bypass the session machine entirely.
        if upper.starts_with("SM,,") {
            return self.quick_send_mail(sender, trimmed, ctx);
        }
        if upper == "CM" {
            return self.quick_check_mail(sender, ctx);
        }
        if upper.starts_with("PB,,") {
            return self.quick_post_bulletin(sender, trimmed, ctx);
        }
        if upper == "CB" || upper.starts_with("CB,,") {
            return self.quick_check_bulletins(sender, trimmed, ctx);
        }
        if upper.starts_with("CHP|") {
            return self.quick_post_channel(sender, trimmed, ctx);
        }
        if upper == "CH" {
            return self.quick_list_channels(sender, ctx);
        }

        match normalize_choice(raw).as_str() {
            "help" | "h" | "?" => Ok(self.show_help(sender, ctx)),
            "m" | "mail" => Ok(self.open_mail_menu(sender, ctx)),
            "b" | "bulletin" | "bulletins" => Ok(self.open_bulletin_menu(sender, ctx)),
            "c" | "channel" | "channels" => Ok(self.open_channel_menu(sender, ctx)),
            "u" | "utilities" => Ok(self.open_utilities_menu(sender, ctx)),
            "s" | "stats" => Ok(self.open_stats_menu(sender, ctx)),
            "n" => {
                ctx.reply(sender, NETWORK_MENU);
                Ok(Some(Flow::NetworkInfo))
            }
            "r" => {
                ctx.reply(sender, RESOURCES_MENU);
                Ok(Some(Flow::Resources))
            }
            "w" | "weather" => {
                ctx.reply(sender, WEATHER_PROMPT);
                Ok(Some(Flow::Weather))
            }
            "g" | "games" => {
                ctx.reply(sender, GAMES_MENU);
                Ok(Some(Flow::Games))
            }
            "f" | "fortune" => {
                self.send_fortune(sender, ctx);
                Ok(None)
            }
            "q" => {
                ctx.reply(sender, QUICK_HELP);
                Ok(None)
            }
            "x" | "exit" => {
                ctx.reply(sender, EXIT_TEXT);
                Ok(None)
            }
            // Catch-all policy: anything unrecognized gets the help menu.
            _ => Ok(self.show_help(sender, ctx)),
        }
    }

    // ---- Menu helpers ------------------------------------------------------

    fn main_menu_text(&self, sender: &str, ctx: &TurnContext<'_>) -> String {
        let unread = ctx.store.mail_for(sender).map(|m| m.len()).unwrap_or(0);
        build_menu(
            &ctx.config.menu.main_menu_items,
            &format!("💾{}💾 (✉️:{})", ctx.config.bbs.name, unread),
            MenuKind::Main,
        )
    }

    fn show_help(&self, sender: &str, ctx: &mut TurnContext<'_>) -> Option<Flow> {
        let menu = self.main_menu_text(sender, ctx);
        ctx.reply(sender, &menu);
        Some(Flow::MainMenu)
    }

    fn show_bbs_menu(&self, sender: &str, ctx: &mut TurnContext<'_>) -> Option<Flow> {
        let menu = build_menu(&ctx.config.menu.bbs_menu_items, "📰BBS Menu📰", MenuKind::Bbs);
        ctx.reply(sender, &menu);
        Some(Flow::BbsMenu)
    }

    fn open_utilities_menu(&self, sender: &str, ctx: &mut TurnContext<'_>) -> Option<Flow> {
        let menu = build_menu(
            &ctx.config.menu.utilities_menu_items,
            "🛠️Utilities Menu🛠️",
            MenuKind::Utilities,
        );
        ctx.reply(sender, &menu);
        Some(Flow::UtilitiesMenu)
    }

    fn open_mail_menu(&self, sender: &str, ctx: &mut TurnContext<'_>) -> Option<Flow> {
        ctx.reply(sender, MAIL_MENU);
        Some(Flow::Mail(MailStep::Action))
    }

    fn open_bulletin_menu(&self, sender: &str, ctx: &mut TurnContext<'_>) -> Option<Flow> {
        ctx.reply(sender, BULLETIN_MENU);
        Some(Flow::Bulletin(BulletinStep::BoardSelect))
    }

    fn open_channel_menu(&self, sender: &str, ctx: &mut TurnContext<'_>) -> Option<Flow> {
        ctx.reply(sender, CHANNEL_MENU);
        Some(Flow::ChannelDirectory(ChannelStep::Action))
    }

    fn open_stats_menu(&self, sender: &str, ctx: &mut TurnContext<'_>) -> Option<Flow> {
        ctx.reply(sender, STATS_MENU);
        Some(Flow::Stats)
    }

    fn send_fortune(&self, sender: &str, ctx: &mut TurnContext<'_>) {
        match games::random_fortune(&ctx.config.games.fortunes_file) {
            Some(fortune) => ctx.reply(sender, &format!("🔮 {} 🔮", fortune)),
            None => ctx.reply(sender, "No fortunes available."),
        }
    }

    fn handle_main_menu(&self, sender: &str, raw: &str, ctx: &mut TurnContext<'_>) -> Option<Flow> {
        match normalize_choice(raw).as_str() {
            "b" => self.show_bbs_menu(sender, ctx),
            "u" => self.open_utilities_menu(sender, ctx),
            "q" => {
                ctx.reply(sender, QUICK_HELP);
                Some(Flow::MainMenu)
            }
            "x" => {
                ctx.reply(sender, EXIT_TEXT);
                None
            }
            _ => self.show_help(sender, ctx),
        }
    }

    fn handle_bbs_menu(&self, sender: &str, raw: &str, ctx: &mut TurnContext<'_>) -> Option<Flow> {
        match normalize_choice(raw).as_str() {
            "m" => self.open_mail_menu(sender, ctx),
            "b" => self.open_bulletin_menu(sender, ctx),
            "c" => self.open_channel_menu(sender, ctx),
            "x" => self.show_help(sender, ctx),
            _ => self.show_bbs_menu(sender, ctx),
        }
    }

    fn handle_utilities_menu(
        &self,
        sender: &str,
        raw: &str,
        ctx: &mut TurnContext<'_>,
    ) -> Option<Flow> {
        match normalize_choice(raw).as_str() {
            "s" => self.open_stats_menu(sender, ctx),
            "n" => {
                ctx.reply(sender, NETWORK_MENU);
                Some(Flow::NetworkInfo)
            }
            "r" => {
                ctx.reply(sender, RESOURCES_MENU);
                Some(Flow::Resources)
            }
            "w" => {
                ctx.reply(sender, WEATHER_PROMPT);
                Some(Flow::Weather)
            }
            "g" => {
                ctx.reply(sender, GAMES_MENU);
                Some(Flow::Games)
            }
            "f" => {
                self.send_fortune(sender, ctx);
                Some(Flow::UtilitiesMenu)
            }
            "x" => self.show_help(sender, ctx),
            _ => self.open_utilities_menu(sender, ctx),
        }
    }

    // ---- Mail flow ---------------------------------------------------------

    fn handle_mail_step(
        &self,
        sender: &str,
        raw: &str,
        step: MailStep,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Option<Flow>> {
        match step {
            MailStep::Action => match normalize_choice(raw).as_str() {
                "r" => {
                    let inbox = ctx.store.mail_for(sender)?;
                    if inbox.is_empty() {
                        ctx.reply(sender, "There are no messages in your mailbox.📭");
                        return Ok(None);
                    }
                    ctx.reply(
                        sender,
                        &format!(
                            "You have {} mail messages. Select a message number to read:",
                            inbox.len()
                        ),
                    );
                    for mail in &inbox {
                        ctx.reply(
                            sender,
                            &format!(
                                "-{}-\nDate: {}\nFrom: {}\nSubject: {}",
                                mail.id, mail.date, mail.sender_short_name, mail.subject
                            ),
                        );
                    }
                    Ok(Some(Flow::Mail(MailStep::SelectMessage)))
                }
                "s" => {
                    ctx.reply(
                        sender,
                        "What is the Short Name of the node you want to leave a message for?",
                    );
                    Ok(Some(Flow::Mail(MailStep::AwaitShortName)))
                }
                "x" => Ok(self.show_help(sender, ctx)),
                _ => {
                    ctx.reply(sender, MAIL_MENU);
                    Ok(Some(Flow::Mail(MailStep::Action)))
                }
            },
            MailStep::SelectMessage => {
                let id = match raw.trim().parse::<i64>() {
                    Ok(id) => id,
                    Err(_) => {
                        ctx.reply(sender, "Invalid input. Please enter a valid message number.");
                        return Ok(Some(Flow::Mail(MailStep::SelectMessage)));
                    }
                };
                match ctx.store.mail_item(id, sender) {
                    Ok(mail) => {
                        self.show_mail_item(sender, &mail, ctx);
                        Ok(Some(Flow::Mail(MailStep::MessageAction { mail })))
                    }
                    Err(StoreError::NotFound(_)) => {
                        info!("node {} tried to access non-existent mail {}", sender, id);
                        ctx.reply(sender, "Mail not found");
                        Ok(None)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            MailStep::MessageAction { mail } => match normalize_choice(raw).as_str() {
                "d" => match ctx.store.delete_mail(&mail.unique_id, sender) {
                    Ok(()) => {
                        ctx.replicator.fan_out(
                            &SyncMessage::MailDelete {
                                unique_id: mail.unique_id.clone(),
                            },
                            ctx.out,
                        );
                        ctx.reply(sender, "The message has been deleted 🗑️");
                        Ok(None)
                    }
                    Err(StoreError::NotFound(_)) => {
                        ctx.reply(sender, "Mail not found");
                        Ok(None)
                    }
                    Err(StoreError::PermissionDenied(_)) => {
                        ctx.reply(sender, "You can only delete mail addressed to you.");
                        Ok(None)
                    }
                    Err(e) => Err(e.into()),
                },
                "r" => {
                    ctx.reply(
                        sender,
                        &format!(
                            "Send your reply to {} now, followed by a message with END",
                            mail.sender_short_name
                        ),
                    );
                    Ok(Some(Flow::Mail(MailStep::ComposeBody {
                        target: ComposeTarget::ReplyTo(mail.id),
                        subject: format!("Re: {}", mail.subject),
                        body: String::new(),
                    })))
                }
                _ => {
                    ctx.reply(sender, "The message has been kept in your inbox.✉️");
                    Ok(None)
                }
            },
            MailStep::AwaitShortName => {
                let short = raw.trim();
                let candidates: Vec<NodeInfo> = ctx
                    .nodes
                    .find_by_short_name(short)
                    .into_iter()
                    .cloned()
                    .collect();
                match candidates.len() {
                    0 => {
                        ctx.reply(sender, "I'm unable to find that node in my database.");
                        ctx.reply(sender, MAIL_MENU);
                        Ok(Some(Flow::Mail(MailStep::Action)))
                    }
                    1 => {
                        let recipient = candidates[0].id.clone();
                        let name = ctx.nodes.display_name(&recipient);
                        ctx.reply(
                            sender,
                            &format!(
                                "What is the subject of your message to {}?\nKeep it short.",
                                name
                            ),
                        );
                        Ok(Some(Flow::Mail(MailStep::AwaitSubject { recipient })))
                    }
                    _ => {
                        ctx.reply(sender, "There are multiple nodes with that short name. Which one would you like to leave a message for?");
                        for (i, node) in candidates.iter().enumerate() {
                            let label = if node.long_name.is_empty() {
                                node.id.clone()
                            } else {
                                node.long_name.clone()
                            };
                            ctx.reply(sender, &format!("[{}] {}", i, label));
                        }
                        Ok(Some(Flow::Mail(MailStep::SelectRecipient { candidates })))
                    }
                }
            }
            MailStep::SelectRecipient { candidates } => {
                let index = match raw.trim().parse::<usize>() {
                    Ok(i) if i < candidates.len() => i,
                    _ => {
                        ctx.reply(sender, "Invalid selection. Please choose a listed number.");
                        return Ok(Some(Flow::Mail(MailStep::SelectRecipient { candidates })));
                    }
                };
                let recipient = candidates[index].id.clone();
                let name = ctx.nodes.display_name(&recipient);
                ctx.reply(
                    sender,
                    &format!(
                        "What is the subject of your message to {}?\nKeep it short.",
                        name
                    ),
                );
                Ok(Some(Flow::Mail(MailStep::AwaitSubject { recipient })))
            }
            MailStep::AwaitSubject { recipient } => {
                let subject = raw.trim().to_string();
                ctx.reply(sender, "Send your message. You can send it in multiple messages if it's too long for one.\nSend a single message with END when you're done");
                Ok(Some(Flow::Mail(MailStep::ComposeBody {
                    target: ComposeTarget::Node(recipient),
                    subject,
                    body: String::new(),
                })))
            }
            MailStep::ComposeBody {
                target,
                subject,
                mut body,
            } => {
                if raw.trim().eq_ignore_ascii_case("end") {
                    let recipient = match &target {
                        ComposeTarget::Node(id) => id.clone(),
                        ComposeTarget::ReplyTo(mail_id) => {
                            match ctx.store.mail_sender(*mail_id)? {
                                Some(id) => id,
                                None => {
                                    ctx.reply(sender, "Unable to resolve the reply recipient.");
                                    return Ok(None);
                                }
                            }
                        }
                    };
                    let sender_short = ctx.nodes.short_name(sender);
                    let record =
                        self.post_mail(ctx, sender, &sender_short, &recipient, &subject, &body)?;
                    let recipient_name = ctx.nodes.display_name(&recipient);
                    ctx.reply(
                        sender,
                        &format!(
                            "Mail has been posted to the mailbox of {}.\n(╯°□°)╯📨📬",
                            recipient_name
                        ),
                    );
                    info!(
                        "mail {} committed from {} to {}",
                        record.unique_id, sender, recipient
                    );
                    Ok(Some(Flow::Mail(MailStep::SendAnother)))
                } else {
                    body.push_str(raw.trim());
                    body.push('\n');
                    Ok(Some(Flow::Mail(MailStep::ComposeBody {
                        target,
                        subject,
                        body,
                    })))
                }
            }
            MailStep::SendAnother => {
                if normalize_choice(raw) == "y" {
                    Ok(self.open_mail_menu(sender, ctx))
                } else {
                    ctx.reply(sender, "Okay, feel free to send another command.");
                    Ok(None)
                }
            }
        }
    }

    fn show_mail_item(&self, sender: &str, mail: &MailRecord, ctx: &mut TurnContext<'_>) {
        ctx.reply(
            sender,
            &format!(
                "Date: {}\nFrom: {}\nSubject: {}\n\n{}",
                mail.date, mail.sender_short_name, mail.subject, mail.content
            ),
        );
        ctx.reply(
            sender,
            "What would you like to do with this message?\n[K]eep  [D]elete  [R]eply",
        );
    }

    /// Commit a mail record: store, fan out to peers, and queue the new-mail
    /// notice to the recipient.
    fn post_mail(
        &self,
        ctx: &mut TurnContext<'_>,
        sender: &str,
        sender_short: &str,
        recipient: &str,
        subject: &str,
        content: &str,
    ) -> Result<MailRecord, StoreError> {
        let record =
            ctx.store
                .create_mail(sender, sender_short, recipient, subject, content, None, None)?;
        ctx.replicator.fan_out(
            &SyncMessage::MailCreate {
                unique_id: record.unique_id.clone(),
                sender: record.sender.clone(),
                sender_short_name: record.sender_short_name.clone(),
                recipient: record.recipient.clone(),
                date: record.date.clone(),
                subject: record.subject.clone(),
                content: record.content.clone(),
            },
            ctx.out,
        );
        ctx.reply(
            recipient,
            &format!(
                "You have a new mail message from {}. Check your mailbox by responding to this message with CM.",
                record.sender_short_name
            ),
        );
        Ok(record)
    }

    // ---- Bulletin flow -----------------------------------------------------

    fn handle_bulletin_step(
        &self,
        sender: &str,
        raw: &str,
        step: BulletinStep,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Option<Flow>> {
        match step {
            BulletinStep::BoardSelect => {
                let choice = normalize_choice(raw);
                if choice == "e" || choice == "x" {
                    return Ok(self.show_bbs_menu(sender, ctx));
                }
                match resolve_board(&choice) {
                    Some(board) => {
                        let count = ctx.store.bulletins(board)?.len();
                        ctx.reply(
                            sender,
                            &format!("{} has {} messages.\n[R]ead  [P]ost", board, count),
                        );
                        Ok(Some(Flow::Bulletin(BulletinStep::BoardAction {
                            board: board.to_string(),
                        })))
                    }
                    None => {
                        ctx.reply(sender, "Invalid board. Reply with a board letter or number:\n[G]eneral  [I]nfo  [N]ews  [U]rgent");
                        Ok(Some(Flow::Bulletin(BulletinStep::BoardSelect)))
                    }
                }
            }
            BulletinStep::BoardAction { board } => match normalize_choice(raw).as_str() {
                "r" => {
                    let bulletins = ctx.store.bulletins(&board)?;
                    if bulletins.is_empty() {
                        ctx.reply(sender, &format!("No bulletins in {}.", board));
                        return Ok(self.show_bbs_menu(sender, ctx));
                    }
                    ctx.reply(
                        sender,
                        &format!("Select a bulletin number to view from {}:", board),
                    );
                    for bulletin in &bulletins {
                        ctx.reply(sender, &format!("[{}] {}", bulletin.id, bulletin.subject));
                    }
                    Ok(Some(Flow::Bulletin(BulletinStep::ReadSelect { board })))
                }
                "p" => {
                    if board.eq_ignore_ascii_case("urgent") && !self.may_post_urgent(sender, ctx) {
                        info!(
                            "urgent post denied for {} (allowed_nodes: {:?})",
                            sender, ctx.config.mesh.allowed_nodes
                        );
                        ctx.reply(sender, "You don't have permission to post to this board.");
                        ctx.reply(sender, BULLETIN_MENU);
                        return Ok(Some(Flow::Bulletin(BulletinStep::BoardSelect)));
                    }
                    ctx.reply(sender, "What is the subject of your bulletin? Keep it short.");
                    Ok(Some(Flow::Bulletin(BulletinStep::AwaitSubject { board })))
                }
                "e" | "x" => Ok(self.show_bbs_menu(sender, ctx)),
                _ => {
                    ctx.reply(sender, "[R]ead  [P]ost");
                    Ok(Some(Flow::Bulletin(BulletinStep::BoardAction { board })))
                }
            },
            BulletinStep::ReadSelect { board } => {
                let id = match raw.trim().parse::<i64>() {
                    Ok(id) => id,
                    Err(_) => {
                        ctx.reply(sender, "Invalid input. Please enter a valid bulletin number.");
                        return Ok(Some(Flow::Bulletin(BulletinStep::ReadSelect { board })));
                    }
                };
                match ctx.store.bulletin(id) {
                    Ok(bulletin) => {
                        ctx.reply(
                            sender,
                            &format!(
                                "From: {}\nDate: {}\nSubject: {}\n- - - - - - -\n{}",
                                bulletin.sender_short_name,
                                bulletin.date,
                                bulletin.subject,
                                bulletin.content
                            ),
                        );
                        Ok(self.show_bbs_menu(sender, ctx))
                    }
                    Err(StoreError::NotFound(_)) => {
                        ctx.reply(sender, "Bulletin not found.");
                        Ok(None)
                    }
                    Err(e) => Err(e.into()),
                }
            }
            BulletinStep::AwaitSubject { board } => {
                let subject = raw.trim().to_string();
                ctx.reply(
                    sender,
                    "Send the contents of your bulletin. Send a message with END when finished.",
                );
                Ok(Some(Flow::Bulletin(BulletinStep::ComposeBody {
                    board,
                    subject,
                    body: String::new(),
                })))
            }
            BulletinStep::ComposeBody {
                board,
                subject,
                mut body,
            } => {
                if raw.trim().eq_ignore_ascii_case("end") {
                    let short = match ctx.nodes.get(sender) {
                        Some(node) if !node.short_name.is_empty() => node.short_name.clone(),
                        Some(_) => format!("Node {}", sender),
                        None => {
                            ctx.reply(sender, "Error: Unable to retrieve your node information.");
                            return Ok(None);
                        }
                    };
                    let record = self.post_bulletin(ctx, &board, &short, &subject, &body)?;
                    ctx.reply(
                        sender,
                        &format!(
                            "Your bulletin '{}' has been posted to {}.\n(╯°□°)╯📄📌[{}]",
                            record.subject, board, board
                        ),
                    );
                    Ok(self.show_bbs_menu(sender, ctx))
                } else {
                    body.push_str(raw.trim());
                    body.push('\n');
                    Ok(Some(Flow::Bulletin(BulletinStep::ComposeBody {
                        board,
                        subject,
                        body,
                    })))
                }
            }
        }
    }

    /// Urgent-board gate: an empty allow-list permits everyone.
    fn may_post_urgent(&self, sender: &str, ctx: &TurnContext<'_>) -> bool {
        let allowed = &ctx.config.mesh.allowed_nodes;
        allowed.is_empty() || allowed.iter().any(|n| n == sender)
    }

    /// Commit a bulletin: store, fan out to peers, and raise the urgent
    /// broadcast notice when applicable. The notice is a human-facing alert,
    /// distinct from the peer sync traffic.
    fn post_bulletin(
        &self,
        ctx: &mut TurnContext<'_>,
        board: &str,
        short: &str,
        subject: &str,
        content: &str,
    ) -> Result<Bulletin, StoreError> {
        let record = ctx
            .store
            .create_bulletin(board, short, subject, content, None, None)?;
        ctx.replicator.fan_out(
            &SyncMessage::BulletinCreate {
                unique_id: record.unique_id.clone(),
                board: record.board.clone(),
                sender_short_name: record.sender_short_name.clone(),
                date: record.date.clone(),
                subject: record.subject.clone(),
                content: record.content.clone(),
            },
            ctx.out,
        );
        if record.board.eq_ignore_ascii_case("urgent") {
            ctx.broadcast(&format!(
                "💥NEW URGENT BULLETIN💥\nFrom: {}\nTitle: {}\nDM 'CB,,Urgent' to view",
                record.sender_short_name, record.subject
            ));
        }
        Ok(record)
    }

    // ---- Channel directory flow --------------------------------------------

    fn handle_channel_step(
        &self,
        sender: &str,
        raw: &str,
        step: ChannelStep,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Option<Flow>> {
        match step {
            ChannelStep::Action => match normalize_choice(raw).as_str() {
                "v" => {
                    let channels = ctx.store.channels()?;
                    if channels.is_empty() {
                        ctx.reply(sender, "No channels available in the directory.");
                        ctx.reply(sender, CHANNEL_MENU);
                        return Ok(Some(Flow::ChannelDirectory(ChannelStep::Action)));
                    }
                    let mut listing = String::from("Select a channel number to view:");
                    for (i, channel) in channels.iter().enumerate() {
                        listing.push_str(&format!("\n[{}] {}", i, channel.name));
                    }
                    ctx.reply(sender, &listing);
                    Ok(Some(Flow::ChannelDirectory(ChannelStep::ViewSelect {
                        channels,
                    })))
                }
                "p" => {
                    ctx.reply(sender, "Name your channel for the directory:");
                    Ok(Some(Flow::ChannelDirectory(ChannelStep::AwaitName)))
                }
                "x" => Ok(self.show_help(sender, ctx)),
                _ => {
                    ctx.reply(sender, CHANNEL_MENU);
                    Ok(Some(Flow::ChannelDirectory(ChannelStep::Action)))
                }
            },
            ChannelStep::ViewSelect { channels } => {
                let index = match raw.trim().parse::<usize>() {
                    Ok(i) => i,
                    Err(_) => {
                        ctx.reply(sender, "Invalid input. Please enter a valid channel number.");
                        return Ok(Some(Flow::ChannelDirectory(ChannelStep::ViewSelect {
                            channels,
                        })));
                    }
                };
                if let Some(channel) = channels.get(index) {
                    ctx.reply(
                        sender,
                        &format!("Channel Name: {}\nChannel URL:\n{}", channel.name, channel.url),
                    );
                }
                ctx.reply(sender, CHANNEL_MENU);
                Ok(Some(Flow::ChannelDirectory(ChannelStep::Action)))
            }
            ChannelStep::AwaitName => {
                let name = raw.trim();
                if name.is_empty() {
                    ctx.reply(sender, "Name your channel for the directory:");
                    return Ok(Some(Flow::ChannelDirectory(ChannelStep::AwaitName)));
                }
                ctx.reply(sender, "Send a message with your channel URL or PSK:");
                Ok(Some(Flow::ChannelDirectory(ChannelStep::AwaitUrl {
                    name: name.to_string(),
                })))
            }
            ChannelStep::AwaitUrl { name } => {
                let url = raw.trim();
                self.post_channel(ctx, &name, url)?;
                ctx.reply(
                    sender,
                    &format!("Your channel '{}' has been added to the directory.", name),
                );
                ctx.reply(sender, CHANNEL_MENU);
                Ok(Some(Flow::ChannelDirectory(ChannelStep::Action)))
            }
        }
    }

    /// Commit a channel directory entry and fan it out to peers.
    fn post_channel(
        &self,
        ctx: &mut TurnContext<'_>,
        name: &str,
        url: &str,
    ) -> Result<(), StoreError> {
        ctx.store.add_channel(name, url)?;
        ctx.replicator.fan_out(
            &SyncMessage::ChannelCreate {
                name: name.to_string(),
                url: url.to_string(),
            },
            ctx.out,
        );
        Ok(())
    }

    // ---- Stats / propagation -----------------------------------------------

    fn handle_stats(
        &self,
        sender: &str,
        raw: &str,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Option<Flow>> {
        let now = Utc::now().timestamp();
        match normalize_choice(raw).as_str() {
            "x" => Ok(self.show_help(sender, ctx)),
            "n" => {
                let report = render_node_counts(ctx.nodes, now);
                ctx.reply(sender, &report);
                Ok(self.open_stats_menu(sender, ctx))
            }
            "h" => {
                let report = render_hw_models(ctx.nodes);
                ctx.reply(sender, &report);
                Ok(self.open_stats_menu(sender, ctx))
            }
            "r" => {
                let report = render_roles(ctx.nodes);
                ctx.reply(sender, &report);
                Ok(self.open_stats_menu(sender, ctx))
            }
            "s" => {
                let report = render_snr_leaderboard(ctx.nodes);
                ctx.reply(sender, &report);
                Ok(self.open_stats_menu(sender, ctx))
            }
            "d" => {
                let report = render_distance_records(ctx.nodes, ctx.config);
                ctx.reply(sender, &report);
                Ok(self.open_stats_menu(sender, ctx))
            }
            "c" => {
                let report = render_channel_activity(ctx.store, now)?;
                ctx.reply(sender, &report);
                Ok(self.open_stats_menu(sender, ctx))
            }
            "t" => {
                let report = render_top_nodes(ctx.nodes, now);
                ctx.reply(sender, &report);
                Ok(self.open_stats_menu(sender, ctx))
            }
            "p" => {
                ctx.reply(sender, PROP_MENU);
                Ok(Some(Flow::PropagationAnalysis))
            }
            _ => Ok(self.open_stats_menu(sender, ctx)),
        }
    }

    fn handle_prop_analysis(
        &self,
        sender: &str,
        raw: &str,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Option<Flow>> {
        let now = Utc::now().timestamp();
        match normalize_choice(raw).as_str() {
            "x" => Ok(self.show_help(sender, ctx)),
            "h" => {
                let report = render_hourly_trend(ctx.store, now)?;
                ctx.reply(sender, &report);
                ctx.reply(sender, PROP_MENU);
                Ok(Some(Flow::PropagationAnalysis))
            }
            "b" => {
                let report = render_prop_records(ctx.store, now)?;
                ctx.reply(sender, &report);
                ctx.reply(sender, PROP_MENU);
                Ok(Some(Flow::PropagationAnalysis))
            }
            "n" => {
                ctx.reply(sender, "Enter node short name to analyze (e.g., 4B80):");
                Ok(Some(Flow::PropagationNodeInput))
            }
            _ => {
                ctx.reply(sender, PROP_MENU);
                Ok(Some(Flow::PropagationAnalysis))
            }
        }
    }

    fn handle_prop_node_input(
        &self,
        sender: &str,
        raw: &str,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Option<Flow>> {
        let short = raw.trim();
        let now = Utc::now().timestamp();
        let hits = ctx.nodes.find_by_short_name(short);
        let report = match hits.first() {
            Some(node) => {
                let stats = ctx.store.node_reliability(&node.id, now, 7)?;
                if stats.message_count > 0 {
                    let quality = if stats.avg_snr > 5.0 {
                        "Excellent"
                    } else if stats.avg_snr > 0.0 {
                        "Good"
                    } else {
                        "Fair"
                    };
                    format!(
                        "📊 {} Reliability 📊\n\nMessages (7d): {}\nAvg SNR: {:+.1}dB\nRange: {:+.1} to {:+.1}dB\nAvg RSSI: {:.0}dBm\n\nSignal Quality: {}",
                        short.to_uppercase(),
                        stats.message_count,
                        stats.avg_snr,
                        stats.min_snr,
                        stats.max_snr,
                        stats.avg_rssi,
                        quality
                    )
                } else {
                    format!("No data for {} in last 7 days.", short.to_uppercase())
                }
            }
            None => format!("Node '{}' not found.", short),
        };
        ctx.reply(sender, &report);
        Ok(None)
    }

    // ---- Network info / resources ------------------------------------------

    fn handle_network_info(
        &self,
        sender: &str,
        raw: &str,
        ctx: &mut TurnContext<'_>,
    ) -> Option<Flow> {
        let now = Utc::now().timestamp();
        match normalize_choice(raw).as_str() {
            "n" => {
                let report = render_network_nodes(ctx.nodes);
                ctx.reply(sender, &report);
                None
            }
            "s" => {
                let report = render_signal_reports(ctx.nodes);
                ctx.reply(sender, &report);
                None
            }
            "m" => {
                let report = render_mesh_health(ctx.nodes, now);
                ctx.reply(sender, &report);
                None
            }
            "x" => self.show_help(sender, ctx),
            _ => {
                ctx.reply(sender, "Invalid option. Please try again.");
                Some(Flow::NetworkInfo)
            }
        }
    }

    fn handle_resources(&self, sender: &str, raw: &str, ctx: &mut TurnContext<'_>) -> Option<Flow> {
        match normalize_choice(raw).as_str() {
            "g" => {
                ctx.reply(
                    sender,
                    "📖 Getting Started 📖\n\nNew to mesh?\n• Change your node name in settings\n• Set up channels to join groups\n• Add friends by their node ID\n• Adjust transmit power for range\n• Use CLIENT role for mobile nodes\n• Use CLIENT_MUTE for base stations\n\nLearn more: meshtastic.org/docs",
                );
                None
            }
            "h" => {
                ctx.reply(
                    sender,
                    "🔧 Recommended Hardware 🔧\n\nPortable:\n- Heltec V3 ($30)\n- T-Beam ($40)\n- RAK WisBlock ($50)\n\nBase Station:\n- Station G2 ($100)\n- RAK Base ($100)\n\nTracker:\n- T1000-E ($30-40)\n\nInfo: meshtastic.org/docs/hardware",
                );
                None
            }
            "l" => {
                ctx.reply(
                    sender,
                    "🔗 Useful Links 🔗\n\nMain Site:\nmeshtastic.org\n\nDocumentation:\nmeshtastic.org/docs\n\nDiscord:\ndiscord.gg/meshtastic\n\nReddit:\nr/meshtastic",
                );
                None
            }
            "x" => self.show_help(sender, ctx),
            _ => {
                ctx.reply(sender, "Invalid option. Please try again.");
                Some(Flow::Resources)
            }
        }
    }

    // ---- Weather / games ---------------------------------------------------

    async fn handle_weather(
        &self,
        sender: &str,
        raw: &str,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Option<Flow>> {
        let zip = raw.trim();
        if zip.len() != 5 || !zip.chars().all(|c| c.is_ascii_digit()) {
            ctx.reply(sender, "Invalid ZIP code. Please enter a 5-digit ZIP code.");
            return Ok(Some(Flow::Weather));
        }
        #[cfg(feature = "weather")]
        {
            let report = ctx.weather.fetch_for_zip(zip).await;
            ctx.reply(sender, &report);
        }
        #[cfg(not(feature = "weather"))]
        ctx.reply(sender, "Weather service unavailable.");
        Ok(None)
    }

    fn handle_games(&self, sender: &str, raw: &str, ctx: &mut TurnContext<'_>) -> Option<Flow> {
        match normalize_choice(raw).as_str() {
            "t" => match games::random_trivia(&ctx.config.games.trivia_file) {
                Some(question) => {
                    ctx.reply(
                        sender,
                        &format!(
                            "🎯 Meshtastic Trivia 🎯\n\n{}\n\nReply with your answer!",
                            question.question
                        ),
                    );
                    Some(Flow::Trivia {
                        answer: question.answer,
                    })
                }
                None => {
                    ctx.reply(sender, "Trivia game unavailable.");
                    None
                }
            },
            "p" => {
                ctx.reply(sender, PROP_CALC_PROMPT);
                Some(Flow::PropagationCalc)
            }
            "x" => self.show_help(sender, ctx),
            _ => {
                ctx.reply(sender, GAMES_MENU);
                Some(Flow::Games)
            }
        }
    }

    fn handle_trivia(
        &self,
        sender: &str,
        raw: &str,
        answer: &str,
        ctx: &mut TurnContext<'_>,
    ) -> Option<Flow> {
        if games::answer_matches(raw, answer) {
            ctx.reply(
                sender,
                &format!(
                    "✅ Correct! The answer is: {}\n\nPlay again? Send 'G' for games or 'X' for the menu.",
                    answer
                ),
            );
        } else {
            ctx.reply(
                sender,
                &format!(
                    "❌ Not quite! The answer was: {}\n\nTry another? Send 'G' for games or 'X' for the menu.",
                    answer
                ),
            );
        }
        None
    }

    fn handle_prop_calc(&self, sender: &str, raw: &str, ctx: &mut TurnContext<'_>) -> Option<Flow> {
        match raw.trim().parse::<f64>() {
            Ok(height_ft) if height_ft >= 0.0 => {
                let distance = games::radio_horizon_miles(height_ft);
                let condition = games::horizon_condition(height_ft);
                ctx.reply(
                    sender,
                    &format!(
                        "📡 Estimated Range 📡\n\nAntenna: {:.0} ft\nLine of Sight: ~{:.1} mi\nCondition: {}\n\nNote: Actual range varies with terrain, weather, and obstacles.",
                        height_ft, distance, condition
                    ),
                );
                None
            }
            _ => {
                ctx.reply(sender, "Please enter a valid number.");
                None
            }
        }
    }

    // ---- Quick commands ----------------------------------------------------

    fn quick_send_mail(
        &self,
        sender: &str,
        raw: &str,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Option<Flow>> {
        let parts: Vec<&str> = raw.splitn(4, ",,").collect();
        if parts.len() != 4 {
            ctx.reply(
                sender,
                "Send Mail Quick Command format:\nSM,,{short_name},,{subject},,{message}",
            );
            return Ok(None);
        }
        let (short_name, subject, content) = (parts[1].trim(), parts[2], parts[3]);
        let candidates = ctx.nodes.find_by_short_name(short_name);
        match candidates.len() {
            0 => {
                ctx.reply(
                    sender,
                    &format!("Node with short name '{}' not found.", short_name),
                );
                Ok(None)
            }
            1 => {
                let recipient = candidates[0].id.clone();
                let sender_short = ctx.nodes.short_name(sender);
                self.post_mail(ctx, sender, &sender_short, &recipient, subject, content)?;
                let recipient_name = ctx.nodes.display_name(&recipient);
                ctx.reply(sender, &format!("Mail has been sent to {}.", recipient_name));
                Ok(None)
            }
            _ => {
                ctx.reply(
                    sender,
                    &format!(
                        "Multiple nodes with short name '{}' found. Please be more specific.",
                        short_name
                    ),
                );
                Ok(None)
            }
        }
    }

    fn quick_check_mail(&self, sender: &str, ctx: &mut TurnContext<'_>) -> Result<Option<Flow>> {
        let inbox = ctx.store.mail_for(sender)?;
        if inbox.is_empty() {
            ctx.reply(sender, "You have no new messages.");
            return Ok(None);
        }
        let mut listing = String::from("📬 You have the following messages:\n");
        for (i, mail) in inbox.iter().enumerate() {
            listing.push_str(&format!(
                "{:02}. From: {}, Subject: {}\n",
                i + 1,
                mail.sender_short_name,
                mail.subject
            ));
        }
        listing.push_str("\nPlease reply with the number of the message you want to read.");
        ctx.reply(sender, &listing);
        Ok(Some(Flow::CheckMail { inbox }))
    }

    fn handle_check_mail(
        &self,
        sender: &str,
        raw: &str,
        inbox: Vec<MailRecord>,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Option<Flow>> {
        let number = match raw.trim().parse::<usize>() {
            Ok(n) => n,
            Err(_) => {
                ctx.reply(sender, "Invalid input. Please enter a valid message number.");
                return Ok(Some(Flow::CheckMail { inbox }));
            }
        };
        if number == 0 || number > inbox.len() {
            ctx.reply(sender, "Invalid message number. Please try again.");
            return Ok(Some(Flow::CheckMail { inbox }));
        }
        // Re-fetch through the recipient-filtered query; the listing may be
        // stale if a replicated delete landed in the meantime.
        match ctx.store.mail_item(inbox[number - 1].id, sender) {
            Ok(mail) => {
                self.show_mail_item(sender, &mail, ctx);
                Ok(Some(Flow::Mail(MailStep::MessageAction { mail })))
            }
            Err(StoreError::NotFound(_)) => {
                ctx.reply(sender, "Mail not found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn quick_post_bulletin(
        &self,
        sender: &str,
        raw: &str,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Option<Flow>> {
        let parts: Vec<&str> = raw.splitn(4, ",,").collect();
        if parts.len() != 4 {
            ctx.reply(
                sender,
                "Post Bulletin Quick Command format:\nPB,,{board_name},,{subject},,{content}",
            );
            return Ok(None);
        }
        let board = match resolve_board(parts[1]) {
            Some(board) => board,
            None => {
                ctx.reply(
                    sender,
                    &format!(
                        "Unknown board '{}'. Available boards: {}.",
                        parts[1].trim(),
                        BOARDS.join(", ")
                    ),
                );
                return Ok(None);
            }
        };
        if board.eq_ignore_ascii_case("urgent") && !self.may_post_urgent(sender, ctx) {
            ctx.reply(sender, "You don't have permission to post to this board.");
            return Ok(None);
        }
        let (subject, content) = (parts[2], parts[3]);
        let short = ctx.nodes.short_name(sender);
        let record = self.post_bulletin(ctx, board, &short, subject, content)?;
        ctx.reply(
            sender,
            &format!(
                "Your bulletin '{}' has been posted to {}.",
                record.subject, board
            ),
        );
        Ok(None)
    }

    fn quick_check_bulletins(
        &self,
        sender: &str,
        raw: &str,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Option<Flow>> {
        let parts: Vec<&str> = raw.splitn(2, ",,").collect();
        if parts.len() != 2 || parts[1].trim().is_empty() {
            ctx.reply(
                sender,
                "Check Bulletins Quick Command format:\nCB,,board_name",
            );
            return Ok(None);
        }
        let board = match resolve_board(parts[1]) {
            Some(board) => board,
            None => {
                ctx.reply(
                    sender,
                    &format!(
                        "Unknown board '{}'. Available boards: {}.",
                        parts[1].trim(),
                        BOARDS.join(", ")
                    ),
                );
                return Ok(None);
            }
        };
        let bulletins = ctx.store.bulletins(board)?;
        if bulletins.is_empty() {
            ctx.reply(
                sender,
                &format!("No bulletins available on {} board.", board),
            );
            return Ok(None);
        }
        let mut listing = format!("📰 Bulletins on {} board:\n", board);
        for (i, bulletin) in bulletins.iter().enumerate() {
            listing.push_str(&format!(
                "[{:02}] Subject: {}, From: {}, Date: {}\n",
                i + 1,
                bulletin.subject,
                bulletin.sender_short_name,
                bulletin.date
            ));
        }
        listing.push_str("\nPlease reply with the number of the bulletin you want to read.");
        ctx.reply(sender, &listing);
        Ok(Some(Flow::CheckBulletin { bulletins }))
    }

    fn handle_check_bulletin(
        &self,
        sender: &str,
        raw: &str,
        bulletins: Vec<Bulletin>,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Option<Flow>> {
        let number = match raw.trim().parse::<usize>() {
            Ok(n) => n,
            Err(_) => {
                ctx.reply(sender, "Invalid input. Please enter a valid bulletin number.");
                return Ok(Some(Flow::CheckBulletin { bulletins }));
            }
        };
        if number == 0 || number > bulletins.len() {
            ctx.reply(sender, "Invalid bulletin number. Please try again.");
            return Ok(Some(Flow::CheckBulletin { bulletins }));
        }
        let bulletin = &bulletins[number - 1];
        ctx.reply(
            sender,
            &format!(
                "Date: {}\nFrom: {}\nSubject: {}\n\n{}",
                bulletin.date, bulletin.sender_short_name, bulletin.subject, bulletin.content
            ),
        );
        Ok(None)
    }

    fn quick_post_channel(
        &self,
        sender: &str,
        raw: &str,
        ctx: &mut TurnContext<'_>,
    ) -> Result<Option<Flow>> {
        // Note the pipe delimiter: unlike the other quick commands this one
        // carries a URL, and URLs regularly contain commas.
        let parts: Vec<&str> = raw.splitn(3, '|').collect();
        if parts.len() != 3 || parts[1].trim().is_empty() || parts[2].trim().is_empty() {
            ctx.reply(
                sender,
                "Post Channel Quick Command format:\nCHP|{channel_name}|{channel_url}",
            );
            return Ok(None);
        }
        let (name, url) = (parts[1].trim(), parts[2].trim());
        self.post_channel(ctx, name, url)?;
        ctx.reply(
            sender,
            &format!("Channel '{}' has been added to the directory.", name),
        );
        Ok(None)
    }

    fn quick_list_channels(&self, sender: &str, ctx: &mut TurnContext<'_>) -> Result<Option<Flow>> {
        let channels = ctx.store.channels()?;
        if channels.is_empty() {
            ctx.reply(sender, "No channels available in the directory.");
            return Ok(None);
        }
        let mut listing = String::from("Available Channels:\n");
        for (i, channel) in channels.iter().enumerate() {
            listing.push_str(&format!("{:02}. Name: {}\n", i + 1, channel.name));
        }
        listing.push_str("\nPlease reply with the number of the channel you want to view.");
        ctx.reply(sender, &listing);
        Ok(Some(Flow::CheckChannel { channels }))
    }

    fn handle_check_channel(
        &self,
        sender: &str,
        raw: &str,
        channels: Vec<crate::db::ChannelEntry>,
        ctx: &mut TurnContext<'_>,
    ) -> Option<Flow> {
        let number = match raw.trim().parse::<usize>() {
            Ok(n) => n,
            Err(_) => {
                ctx.reply(sender, "Invalid input. Please enter a valid channel number.");
                return Some(Flow::CheckChannel { channels });
            }
        };
        if number == 0 || number > channels.len() {
            ctx.reply(sender, "Invalid channel number. Please try again.");
            return Some(Flow::CheckChannel { channels });
        }
        let channel = &channels[number - 1];
        ctx.reply(
            sender,
            &format!("Channel Name: {}\nChannel URL: {}", channel.name, channel.url),
        );
        None
    }
}

impl Default for CommandProcessor {
    fn default() -> Self {
        Self::new()
    }
}

// ---- Stats rendering helpers ----------------------------------------------

fn render_node_counts(nodes: &NodeDirectory, now: i64) -> String {
    let windows: [(&str, Option<i64>); 4] = [
        ("All time", None),
        ("Last 24 hours", Some(86_400)),
        ("Last 8 hours", Some(28_800)),
        ("Last hour", Some(3_600)),
    ];
    let mut out = String::from("Total nodes seen:");
    for (label, window) in windows {
        out.push_str(&format!("\n- {}: {}", label, nodes.seen_within(now, window)));
    }
    out
}

fn counted_lines(counts: HashMap<String, usize>) -> String {
    let mut entries: Vec<(String, usize)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries
        .into_iter()
        .map(|(name, count)| format!("{}: {}", name, count))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_hw_models(nodes: &NodeDirectory) -> String {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for node in nodes.iter() {
        let model = node.hw_model.clone().unwrap_or_else(|| "Unknown".to_string());
        *counts.entry(model).or_insert(0) += 1;
    }
    format!("Hardware Models:\n{}", counted_lines(counts))
}

fn render_roles(nodes: &NodeDirectory) -> String {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for node in nodes.iter() {
        let role = node.role.clone().unwrap_or_else(|| "Unknown".to_string());
        *counts.entry(role).or_insert(0) += 1;
    }
    format!("Roles:\n{}", counted_lines(counts))
}

fn render_snr_leaderboard(nodes: &NodeDirectory) -> String {
    let mut entries: Vec<(f64, String)> = nodes
        .iter()
        .filter_map(|n| n.snr.map(|snr| (snr, n.short_name.clone())))
        .collect();
    if entries.is_empty() {
        return "No SNR data available yet.".to_string();
    }
    entries.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let mut out = String::from("📶 SNR Leaderboard 📶\n\nBest Signals:");
    for (i, (snr, name)) in entries.iter().take(10).enumerate() {
        out.push_str(&format!("\n{}. {} - {:.1} dB", i + 1, name, snr));
    }
    out
}

fn render_distance_records(nodes: &NodeDirectory, config: &Config) -> String {
    let own = match own_position(nodes, config) {
        Some(pos) => pos,
        None => return "GPS position not available.".to_string(),
    };
    let mut distances: Vec<(f64, String)> = nodes
        .iter()
        .filter(|n| n.id != config.mesh.node_id)
        .filter_map(|n| match (n.latitude, n.longitude) {
            (Some(lat), Some(lon)) => {
                Some((haversine_miles(own.0, own.1, lat, lon), n.short_name.clone()))
            }
            _ => None,
        })
        .collect();
    if distances.is_empty() {
        return "No distance data available.".to_string();
    }
    distances.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let mut out = String::from("🌍 Distance Records 🌍\n\nFarthest Nodes:");
    for (i, (distance, name)) in distances.iter().take(10).enumerate() {
        out.push_str(&format!("\n{}. {} - {:.1} mi", i + 1, name, distance));
    }
    out
}

fn own_position(nodes: &NodeDirectory, config: &Config) -> Option<(f64, f64)> {
    if let (Some(lat), Some(lon)) = (config.mesh.latitude, config.mesh.longitude) {
        return Some((lat, lon));
    }
    let own = nodes.get(&config.mesh.node_id)?;
    match (own.latitude, own.longitude) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        _ => None,
    }
}

fn haversine_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_MILES: f64 = 3959.0;
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * a.sqrt().asin()
}

fn render_top_nodes(nodes: &NodeDirectory, now: i64) -> String {
    let mut recent: Vec<(i64, String)> = nodes
        .iter()
        .filter_map(|n| n.last_heard.map(|h| (h, n.short_name.clone())))
        .collect();
    if recent.is_empty() {
        return "No activity data available.".to_string();
    }
    recent.sort_by(|a, b| b.0.cmp(&a.0));
    let mut out = String::from("⭐ Most Active Nodes ⭐\n\nRecent Activity:");
    for (i, (heard, name)) in recent.iter().take(10).enumerate() {
        let mins = (now - heard) as f64 / 60.0;
        let when = if mins < 1.0 {
            "Just now".to_string()
        } else if mins < 60.0 {
            format!("{:.0}m ago", mins)
        } else {
            format!("{:.1}h ago", mins / 60.0)
        };
        out.push_str(&format!("\n{}. {} - {}", i + 1, name, when));
    }
    out
}

fn render_mesh_health(nodes: &NodeDirectory, now: i64) -> String {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for node in nodes.iter() {
        let model = node.hw_model.clone().unwrap_or_else(|| "UNKNOWN".to_string());
        *counts.entry(model).or_insert(0) += 1;
    }
    let mut entries: Vec<(String, usize)> = counts.into_iter().collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let mut out = format!(
        "🏥 Mesh Health 🏥\n\nTotal Nodes: {}\nActive (1h): {}\n\nHardware Types:",
        nodes.len(),
        nodes.seen_within(now, Some(3_600))
    );
    for (model, count) in entries.into_iter().take(5) {
        out.push_str(&format!("\n{}: {}", model, count));
    }
    out
}

fn render_network_nodes(nodes: &NodeDirectory) -> String {
    if nodes.is_empty() {
        return "No nodes heard yet.".to_string();
    }
    let mut sorted: Vec<&NodeInfo> = nodes.iter().collect();
    sorted.sort_by(|a, b| b.last_heard.unwrap_or(0).cmp(&a.last_heard.unwrap_or(0)));
    let total = sorted.len();
    let mut out = format!(
        "📡 Mesh Network Status 📡\n\nTotal Nodes: {}\n\nRecent Nodes:",
        total
    );
    for (i, node) in sorted.iter().take(10).enumerate() {
        let short = if node.short_name.is_empty() { "UNK" } else { node.short_name.as_str() };
        let long = if node.long_name.is_empty() { "Unknown" } else { node.long_name.as_str() };
        out.push_str(&format!("\n{}. {} - {}", i + 1, short, long));
    }
    if total > 10 {
        out.push_str(&format!("\n\n...and {} more nodes", total - 10));
    }
    out
}

fn render_signal_reports(nodes: &NodeDirectory) -> String {
    let mut entries: Vec<(f64, String)> = nodes
        .iter()
        .filter_map(|n| n.snr.map(|snr| (snr, n.short_name.clone())))
        .collect();
    if entries.is_empty() {
        return "No signal data available yet.".to_string();
    }
    entries.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let mut out = String::from("📶 Signal Reports 📶\n\nRecent SNR readings:");
    for (snr, name) in entries.iter().take(10) {
        out.push_str(&format!("\n{}: {:.1} dB", name, snr));
    }
    out
}

fn render_channel_activity(store: &Store, now: i64) -> Result<String, StoreError> {
    let channel_stats = store.channel_activity(now, 24)?;
    let msg_stats = store.message_stats(now, 24)?;

    let mut out = format!(
        "📻 Channel Activity (24h) 📻\n\nTotal Messages: {}\nAvg SNR: {:.1} dB\n",
        msg_stats.total, msg_stats.avg_snr
    );
    if channel_stats.is_empty() {
        out.push_str("\nNo channel data yet.");
    } else {
        out.push_str("\nMessages by Channel:");
        for (channel_index, count) in &channel_stats {
            let name = match channel_index {
                0 => "Primary".to_string(),
                n => format!("Channel {}", n),
            };
            out.push_str(&format!("\n- {}: {} msgs", name, count));
        }
    }
    if !msg_stats.top_senders.is_empty() {
        out.push_str("\n\nTop Senders:");
        for (i, (name, count)) in msg_stats.top_senders.iter().take(5).enumerate() {
            out.push_str(&format!("\n{}. {}: {}", i + 1, name, count));
        }
    }
    Ok(out)
}

fn render_hourly_trend(store: &Store, now: i64) -> Result<String, StoreError> {
    let hourly = store.hourly_snr_trend(now, 7)?;
    if hourly.is_empty() {
        return Ok("Not enough data yet. Check back after a few days!".to_string());
    }
    let mut out = String::from("📡 Best Times to Mesh 📡\n\nAvg SNR by Hour (7 days):");
    for entry in hourly {
        let ampm = if entry.hour < 12 { "AM" } else { "PM" };
        let hour12 = match entry.hour % 12 {
            0 => 12,
            h => h,
        };
        out.push_str(&format!(
            "\n{:2}{}: {:+.1}dB ({}msg)",
            hour12, ampm, entry.avg_snr, entry.count
        ));
    }
    Ok(out)
}

fn render_prop_records(store: &Store, now: i64) -> Result<String, StoreError> {
    let (best, worst) = store.best_worst_snr(now, 7)?;
    let mut out = String::from("🏆 Propagation Records 🏆\n\nBest SNR (7 days):");
    for (name, snr) in best.iter().take(5) {
        out.push_str(&format!("\n{}: {:+.1}dB", name, snr));
    }
    out.push_str("\n\n📉 Weakest Signals:");
    for (name, snr) in worst.iter().take(5) {
        out.push_str(&format!("\n{}: {:+.1}dB", name, snr));
    }
    Ok(out)
}
