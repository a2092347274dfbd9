//! Replication behavior: idempotent applies, ordering independence, one-hop
//! fan-out, and peer/sync recognition at the server boundary.

mod common;

use wildcat::db::Store;
use wildcat::mesh::TextEvent;
use wildcat::sync::{self, SyncMessage};

fn bulletin_create(uid: &str) -> SyncMessage {
    SyncMessage::BulletinCreate {
        unique_id: uid.to_string(),
        board: "General".to_string(),
        sender_short_name: "AB1".to_string(),
        date: "2026-08-08 12:00".to_string(),
        subject: "hello".to_string(),
        content: "body\n".to_string(),
    }
}

#[test]
fn applying_the_same_create_twice_is_idempotent() {
    let store = Store::open_in_memory().unwrap();
    let msg = bulletin_create("uid-1");
    sync::apply(&store, &msg).unwrap();
    sync::apply(&store, &msg).unwrap();

    let listed = store.bulletins("General").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].unique_id, "uid-1");
}

#[test]
fn delete_before_create_is_a_noop_and_create_still_lands() {
    let store = Store::open_in_memory().unwrap();

    // The delete raced ahead of the create: silently ignored, no tombstone.
    sync::apply(
        &store,
        &SyncMessage::BulletinDelete {
            unique_id: "uid-2".to_string(),
        },
    )
    .unwrap();
    assert!(store.bulletins("General").unwrap().is_empty());

    // The create arrives later and takes effect.
    sync::apply(&store, &bulletin_create("uid-2")).unwrap();
    assert_eq!(store.bulletins("General").unwrap().len(), 1);
}

#[test]
fn mail_sync_round_trips_through_the_store() {
    let store = Store::open_in_memory().unwrap();
    let msg = SyncMessage::MailCreate {
        unique_id: "uid-3".to_string(),
        sender: "!bob".to_string(),
        sender_short_name: "BOB".to_string(),
        recipient: "!alice".to_string(),
        date: "2026-08-08 12:00".to_string(),
        subject: "hi".to_string(),
        content: "line\n".to_string(),
    };
    sync::apply(&store, &msg).unwrap();
    sync::apply(&store, &msg).unwrap();

    let inbox = store.mail_for("!alice").unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].unique_id, "uid-3");
    assert_eq!(inbox[0].sender, "!bob");

    sync::apply(
        &store,
        &SyncMessage::MailDelete {
            unique_id: "uid-3".to_string(),
        },
    )
    .unwrap();
    assert!(store.mail_for("!alice").unwrap().is_empty());
}

#[tokio::test]
async fn peer_sync_is_applied_without_reply_or_rebroadcast() {
    let mut server = common::test_server(&["!peer1"]);
    let payload = bulletin_create("uid-4").encode();

    server
        .handle_event(TextEvent::direct("!peer1", common::BBS_ID, &payload))
        .await
        .unwrap();

    // Applied locally...
    let listed = server.store().bulletins("General").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].unique_id, "uid-4");
    // ...but never answered, never re-broadcast, and no session started.
    assert!(server.sent_messages().is_empty());
    assert!(server.active_flow("!peer1").is_none());
}

#[tokio::test]
async fn sync_shaped_text_from_a_non_peer_is_not_applied() {
    let mut server = common::test_server(&["!peer1"]);
    let payload = bulletin_create("uid-5").encode();

    common::dm(&mut server, "!rando", &payload).await;

    // Not applied; the sender just gets the catch-all help menu.
    assert!(server.store().bulletins("General").unwrap().is_empty());
    assert!(!server.sent_messages().is_empty());
}

#[tokio::test]
async fn local_commit_fans_out_once_per_peer() {
    let mut server = common::test_server(&["!peer1", "!peer2"]);
    server.nodes_mut().upsert(common::node("!u1", "U1", "User One"));

    common::dm(&mut server, "!u1", "PB,,General,,test,,hello peers").await;

    let sent = server.take_sent();
    let syncs: Vec<_> = sent
        .iter()
        .filter(|m| m.content.starts_with("BULLETIN|"))
        .collect();
    assert_eq!(syncs.len(), 2);
    let mut peers: Vec<_> = syncs.iter().map(|m| m.to.clone().unwrap()).collect();
    peers.sort();
    assert_eq!(peers, vec!["!peer1", "!peer2"]);

    // The payload parses back to the committed record.
    let posted = server.store().bulletins("General").unwrap();
    let record = &posted[0];
    match SyncMessage::parse(&syncs[0].content).unwrap() {
        SyncMessage::BulletinCreate {
            unique_id, subject, ..
        } => {
            assert_eq!(unique_id, record.unique_id);
            assert_eq!(subject, "test");
        }
        other => panic!("unexpected sync message: {:?}", other),
    }
}

#[tokio::test]
async fn mail_delete_fans_out_by_unique_id_only() {
    let mut server = common::test_server(&["!peer1"]);
    let mail = server
        .store()
        .create_mail("!bob", "BOB", "!alice", "hi", "body", None, None)
        .unwrap();

    // alice reads and deletes through the CM flow.
    common::dm(&mut server, "!alice", "CM").await;
    common::dm(&mut server, "!alice", "1").await;
    common::dm(&mut server, "!alice", "d").await;

    assert!(server.store().mail_for("!alice").unwrap().is_empty());
    let sent = server.take_sent();
    let delete = sent
        .iter()
        .find(|m| m.content.starts_with("DELETE_MAIL|"))
        .expect("delete sync queued");
    assert_eq!(delete.to.as_deref(), Some("!peer1"));
    assert_eq!(delete.content, format!("DELETE_MAIL|{}", mail.unique_id));
    // The store-local id never crosses the air.
    assert!(!delete.content.contains(&format!("|{}|", mail.id)));
}

#[tokio::test]
async fn two_servers_converge_through_sync_messages() {
    let mut origin = common::test_server(&["!nodeB"]);
    let mut replica = common::test_server(&["!nodeA"]);
    origin.nodes_mut().upsert(common::node("!u1", "U1", "User One"));

    common::dm(&mut origin, "!u1", "PB,,News,,storm,,take cover").await;

    // Carry the queued sync message over the "air" to the replica.
    let sent = origin.take_sent();
    let payload = &sent
        .iter()
        .find(|m| m.content.starts_with("BULLETIN|"))
        .unwrap()
        .content;
    replica
        .handle_event(TextEvent::direct("!nodeA", common::BBS_ID, payload))
        .await
        .unwrap();

    let a = origin.store().bulletins("News").unwrap();
    let b = replica.store().bulletins("News").unwrap();
    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_eq!(a[0].unique_id, b[0].unique_id);
    assert_eq!(a[0].content, b[0].content);
    assert_eq!(a[0].date, b[0].date);
}
