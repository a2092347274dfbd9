//! Test utilities & fixtures.
//! Builds servers around an in-memory store so tests never touch the disk.

#![allow(dead_code)] // Not every test crate uses every helper.

use wildcat::bbs::BbsServer;
use wildcat::config::Config;
use wildcat::db::Store;
use wildcat::mesh::{NodeInfo, TextEvent};

/// Our own station id in tests.
pub const BBS_ID: &str = "!bbs0001";

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.mesh.node_id = BBS_ID.to_string();
    config.storage.db_path = ":memory:".to_string();
    config.logging.file = None;
    config
}

/// A server with an in-memory store and the given replication peer set.
pub fn test_server(peers: &[&str]) -> BbsServer {
    let mut config = test_config();
    config.mesh.bbs_nodes = peers.iter().map(|s| s.to_string()).collect();
    server_with_config(config)
}

pub fn server_with_config(config: Config) -> BbsServer {
    BbsServer::with_store(config, Store::open_in_memory().expect("store"))
}

pub fn node(id: &str, short: &str, long: &str) -> NodeInfo {
    NodeInfo {
        id: id.to_string(),
        short_name: short.to_string(),
        long_name: long.to_string(),
        ..NodeInfo::default()
    }
}

/// Drive one direct message into the server.
pub async fn dm(server: &mut BbsServer, from: &str, text: &str) {
    server
        .handle_event(TextEvent::direct(from, BBS_ID, text))
        .await
        .expect("handle event");
}

/// The last message sent to `to`, panicking if none exists.
pub fn last_reply_to(server: &BbsServer, to: &str) -> String {
    server
        .sent_messages()
        .iter()
        .rev()
        .find(|m| m.to.as_deref() == Some(to))
        .map(|m| m.content.clone())
        .unwrap_or_else(|| panic!("no reply sent to {}", to))
}
