//! Session-free quick commands: SM, CM, PB, CB, CHP, CH.

mod common;

use wildcat::bbs::session::Flow;

#[tokio::test]
async fn sm_commits_one_mail_with_no_session() {
    let mut server = common::test_server(&[]);
    server.nodes_mut().upsert(common::node("!u1", "U1", "User One"));
    server.nodes_mut().upsert(common::node("!bob", "bob", "Bob Base"));

    assert!(server.active_flow("!u1").is_none());
    common::dm(&mut server, "!u1", "SM,,bob,,Test,,Body text").await;

    let inbox = server.store().mail_for("!bob").unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].subject, "Test");
    assert_eq!(inbox[0].content, "Body text");
    assert_eq!(inbox[0].sender, "!u1");

    // No session before or after, and both parties were notified.
    assert!(server.active_flow("!u1").is_none());
    assert!(common::last_reply_to(&server, "!u1").contains("Mail has been sent to Bob Base."));
    assert!(common::last_reply_to(&server, "!bob").contains("new mail message from U1"));
}

#[tokio::test]
async fn sm_with_wrong_arity_replies_usage_and_does_nothing() {
    let mut server = common::test_server(&[]);
    server.nodes_mut().upsert(common::node("!bob", "bob", "Bob Base"));

    common::dm(&mut server, "!u1", "SM,,bob,,missing body").await;

    assert!(common::last_reply_to(&server, "!u1").contains("Send Mail Quick Command format:"));
    assert!(server.store().mail_for("!bob").unwrap().is_empty());
    assert!(server.active_flow("!u1").is_none());
}

#[tokio::test]
async fn sm_reports_unknown_and_ambiguous_short_names() {
    let mut server = common::test_server(&[]);
    server.nodes_mut().upsert(common::node("!bob1", "bob", "Bob Mobile"));
    server.nodes_mut().upsert(common::node("!bob2", "bob", "Bob Base"));

    common::dm(&mut server, "!u1", "SM,,carol,,hi,,text").await;
    assert!(common::last_reply_to(&server, "!u1")
        .contains("Node with short name 'carol' not found."));

    common::dm(&mut server, "!u1", "SM,,bob,,hi,,text").await;
    assert!(common::last_reply_to(&server, "!u1")
        .contains("Multiple nodes with short name 'bob' found."));

    assert!(server.store().mail_for("!bob1").unwrap().is_empty());
    assert!(server.store().mail_for("!bob2").unwrap().is_empty());
}

#[tokio::test]
async fn cm_lists_then_reads_by_number() {
    let mut server = common::test_server(&[]);
    server
        .store()
        .create_mail("!bob", "BOB", "!u1", "first", "body one\n", None, None)
        .unwrap();
    server
        .store()
        .create_mail("!eve", "EVE", "!u1", "second", "body two\n", None, None)
        .unwrap();

    common::dm(&mut server, "!u1", "CM").await;
    let listing = common::last_reply_to(&server, "!u1");
    assert!(listing.contains("01. From: BOB, Subject: first"));
    assert!(listing.contains("02. From: EVE, Subject: second"));

    common::dm(&mut server, "!u1", "2").await;
    let sent = server.take_sent();
    assert!(sent.iter().any(|m| m.content.contains("body two")));
    assert!(sent
        .iter()
        .any(|m| m.content.contains("[K]eep  [D]elete  [R]eply")));
}

#[tokio::test]
async fn cm_with_empty_mailbox() {
    let mut server = common::test_server(&[]);
    common::dm(&mut server, "!u1", "CM").await;
    assert_eq!(common::last_reply_to(&server, "!u1"), "You have no new messages.");
    assert!(server.active_flow("!u1").is_none());
}

#[tokio::test]
async fn cm_rejects_bad_numbers_without_losing_the_listing() {
    let mut server = common::test_server(&[]);
    server
        .store()
        .create_mail("!bob", "BOB", "!u1", "only", "body\n", None, None)
        .unwrap();

    common::dm(&mut server, "!u1", "CM").await;
    common::dm(&mut server, "!u1", "nine").await;
    assert!(common::last_reply_to(&server, "!u1")
        .contains("Invalid input. Please enter a valid message number."));
    assert!(matches!(
        server.active_flow("!u1"),
        Some(Flow::CheckMail { .. })
    ));

    common::dm(&mut server, "!u1", "5").await;
    assert!(common::last_reply_to(&server, "!u1")
        .contains("Invalid message number. Please try again."));
    assert!(matches!(
        server.active_flow("!u1"),
        Some(Flow::CheckMail { .. })
    ));
}

#[tokio::test]
async fn pb_commits_a_bulletin_without_a_session() {
    let mut server = common::test_server(&["!peer1"]);
    server.nodes_mut().upsert(common::node("!u1", "U1", "User One"));

    common::dm(&mut server, "!u1", "PB,,news,,road closed,,use the back gate").await;

    let posted = server.store().bulletins("News").unwrap();
    assert_eq!(posted.len(), 1);
    assert_eq!(posted[0].subject, "road closed");
    assert_eq!(posted[0].content, "use the back gate");
    assert!(server.active_flow("!u1").is_none());
    assert!(common::last_reply_to(&server, "!u1")
        .contains("Your bulletin 'road closed' has been posted to News."));
}

#[tokio::test]
async fn pb_validates_arity_and_board() {
    let mut server = common::test_server(&[]);
    server.nodes_mut().upsert(common::node("!u1", "U1", "User One"));

    common::dm(&mut server, "!u1", "PB,,news,,no content").await;
    assert!(common::last_reply_to(&server, "!u1").contains("Post Bulletin Quick Command format:"));

    common::dm(&mut server, "!u1", "PB,,classifieds,,subj,,content").await;
    assert!(common::last_reply_to(&server, "!u1").contains("Unknown board 'classifieds'"));

    assert!(server.store().bulletins("News").unwrap().is_empty());
}

#[tokio::test]
async fn pb_respects_the_urgent_allow_list() {
    let mut config = common::test_config();
    config.mesh.allowed_nodes = vec!["!op".to_string()];
    let mut server = common::server_with_config(config);
    server.nodes_mut().upsert(common::node("!u1", "U1", "User One"));

    common::dm(&mut server, "!u1", "PB,,urgent,,help,,now").await;
    assert!(common::last_reply_to(&server, "!u1")
        .contains("You don't have permission to post to this board."));
    assert!(server.store().bulletins("Urgent").unwrap().is_empty());
}

#[tokio::test]
async fn cb_lists_a_board_then_reads_by_number() {
    let mut server = common::test_server(&[]);
    server
        .store()
        .create_bulletin("General", "AB1", "hello", "world\n", None, None)
        .unwrap();

    common::dm(&mut server, "!u1", "CB,,general").await;
    let listing = common::last_reply_to(&server, "!u1");
    assert!(listing.contains("Bulletins on General board:"));
    assert!(listing.contains("[01] Subject: hello, From: AB1"));

    common::dm(&mut server, "!u1", "1").await;
    let reply = common::last_reply_to(&server, "!u1");
    assert!(reply.contains("Subject: hello"));
    assert!(reply.contains("world"));
    assert!(server.active_flow("!u1").is_none());
}

#[tokio::test]
async fn cb_usage_and_unknown_board() {
    let mut server = common::test_server(&[]);

    common::dm(&mut server, "!u1", "CB").await;
    assert!(common::last_reply_to(&server, "!u1")
        .contains("Check Bulletins Quick Command format:\nCB,,board_name"));

    common::dm(&mut server, "!u1", "CB,,classifieds").await;
    assert!(common::last_reply_to(&server, "!u1").contains("Unknown board 'classifieds'"));

    common::dm(&mut server, "!u1", "CB,,info").await;
    assert!(common::last_reply_to(&server, "!u1").contains("No bulletins available on Info board."));
}

#[tokio::test]
async fn chp_uses_pipes_and_replicates() {
    let mut server = common::test_server(&["!peer1"]);

    common::dm(&mut server, "!u1", "CHP|Austin Mesh|https://example.com/c?add=1,2").await;

    let channels = server.store().channels().unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].name, "Austin Mesh");
    assert_eq!(channels[0].url, "https://example.com/c?add=1,2");

    let sent = server.take_sent();
    assert!(sent.iter().any(|m| {
        m.to.as_deref() == Some("!peer1")
            && m.content == "CHANNEL|Austin Mesh|https://example.com/c?add=1,2"
    }));
}

#[tokio::test]
async fn chp_wrong_arity_replies_usage() {
    let mut server = common::test_server(&[]);
    common::dm(&mut server, "!u1", "CHP|only-name").await;
    assert!(common::last_reply_to(&server, "!u1")
        .contains("Post Channel Quick Command format:\nCHP|{channel_name}|{channel_url}"));
    assert!(server.store().channels().unwrap().is_empty());
}

#[tokio::test]
async fn ch_lists_then_shows_a_channel() {
    let mut server = common::test_server(&[]);
    server
        .store()
        .add_channel("Austin Mesh", "https://example.com/a")
        .unwrap();

    common::dm(&mut server, "!u1", "CH").await;
    assert!(common::last_reply_to(&server, "!u1").contains("01. Name: Austin Mesh"));

    common::dm(&mut server, "!u1", "1").await;
    let reply = common::last_reply_to(&server, "!u1");
    assert!(reply.contains("Channel Name: Austin Mesh"));
    assert!(reply.contains("https://example.com/a"));
    assert!(server.active_flow("!u1").is_none());
}
