//! Channel directory flow: view by index, post name + URL.

mod common;

use wildcat::bbs::session::{ChannelStep, Flow};

#[tokio::test]
async fn posting_a_channel_through_the_flow() {
    let mut server = common::test_server(&["!peer1"]);

    common::dm(&mut server, "!u1", "c").await;
    assert!(common::last_reply_to(&server, "!u1").contains("CHANNEL DIRECTORY"));

    common::dm(&mut server, "!u1", "p").await;
    assert!(common::last_reply_to(&server, "!u1").contains("Name your channel"));

    common::dm(&mut server, "!u1", "Hill Country Mesh").await;
    assert!(common::last_reply_to(&server, "!u1").contains("URL or PSK"));

    common::dm(&mut server, "!u1", "https://example.com/hcm").await;
    assert!(common::last_reply_to(&server, "!u1").contains("CHANNEL DIRECTORY"));

    let channels = server.store().channels().unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].name, "Hill Country Mesh");

    // Replicated to the peer as a channel-create.
    assert!(server.sent_messages().iter().any(|m| {
        m.to.as_deref() == Some("!peer1")
            && m.content == "CHANNEL|Hill Country Mesh|https://example.com/hcm"
    }));
    // Flow returned to the directory menu.
    assert!(matches!(
        server.active_flow("!u1"),
        Some(Flow::ChannelDirectory(ChannelStep::Action))
    ));
}

#[tokio::test]
async fn viewing_channels_by_index() {
    let mut server = common::test_server(&[]);
    server.store().add_channel("Alpha", "https://a.example").unwrap();
    server.store().add_channel("Bravo", "https://b.example").unwrap();

    common::dm(&mut server, "!u1", "c").await;
    common::dm(&mut server, "!u1", "v").await;
    let listing = common::last_reply_to(&server, "!u1");
    assert!(listing.contains("[0] Alpha"));
    assert!(listing.contains("[1] Bravo"));

    common::dm(&mut server, "!u1", "1").await;
    let sent = server.take_sent();
    assert!(sent
        .iter()
        .any(|m| m.content.contains("Channel Name: Bravo") && m.content.contains("https://b.example")));
    // Back at the directory menu afterwards.
    assert!(matches!(
        server.active_flow("!u1"),
        Some(Flow::ChannelDirectory(ChannelStep::Action))
    ));
}

#[tokio::test]
async fn viewing_an_empty_directory_stays_on_the_menu() {
    let mut server = common::test_server(&[]);
    common::dm(&mut server, "!u1", "c").await;
    common::dm(&mut server, "!u1", "v").await;
    assert!(server
        .sent_messages()
        .iter()
        .any(|m| m.content.contains("No channels available in the directory.")));
    assert!(matches!(
        server.active_flow("!u1"),
        Some(Flow::ChannelDirectory(ChannelStep::Action))
    ));
}

#[tokio::test]
async fn bad_view_index_is_rejected_without_losing_the_listing() {
    let mut server = common::test_server(&[]);
    server.store().add_channel("Alpha", "https://a.example").unwrap();

    common::dm(&mut server, "!u1", "c").await;
    common::dm(&mut server, "!u1", "v").await;
    common::dm(&mut server, "!u1", "first").await;
    assert!(common::last_reply_to(&server, "!u1")
        .contains("Invalid input. Please enter a valid channel number."));
    assert!(matches!(
        server.active_flow("!u1"),
        Some(Flow::ChannelDirectory(ChannelStep::ViewSelect { .. }))
    ));

    // An out-of-range index quietly returns to the menu.
    common::dm(&mut server, "!u1", "9").await;
    assert!(matches!(
        server.active_flow("!u1"),
        Some(Flow::ChannelDirectory(ChannelStep::Action))
    ));
}
