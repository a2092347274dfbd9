//! Record store behavior: board CRUD, identity rules, and the recipient
//! boundary on mail.

use wildcat::db::{Store, StoreError};

#[test]
fn bulletin_create_list_delete_round_trip() {
    let store = Store::open_in_memory().unwrap();
    let posted = store
        .create_bulletin("General", "AB1", "antenna party", "saturday 2pm", None, None)
        .unwrap();

    let listed = store.bulletins("General").unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].unique_id, posted.unique_id);
    assert_eq!(listed[0].subject, "antenna party");

    // Deleting one bulletin removes it and nothing else.
    let other = store
        .create_bulletin("General", "CD2", "other", "body", None, None)
        .unwrap();
    let removed = store.delete_bulletin(posted.id).unwrap();
    assert_eq!(removed.unique_id, posted.unique_id);

    let remaining = store.bulletins("General").unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].unique_id, other.unique_id);
}

#[test]
fn bulletins_keep_insertion_order_per_board() {
    let store = Store::open_in_memory().unwrap();
    for subject in ["first", "second", "third"] {
        store
            .create_bulletin("News", "AB1", subject, "x", None, None)
            .unwrap();
    }
    store
        .create_bulletin("Info", "AB1", "elsewhere", "x", None, None)
        .unwrap();

    let listed = store.bulletins("News").unwrap();
    let subjects: Vec<&str> = listed.iter().map(|b| b.subject.as_str()).collect();
    assert_eq!(subjects, vec!["first", "second", "third"]);
}

#[test]
fn supplied_unique_id_is_stored_verbatim() {
    let store = Store::open_in_memory().unwrap();
    let record = store
        .create_bulletin("Info", "AB1", "s", "c", Some("peer-uid-1"), Some("2026-08-01 09:00"))
        .unwrap();
    assert_eq!(record.unique_id, "peer-uid-1");
    assert_eq!(record.date, "2026-08-01 09:00");
}

#[test]
fn deleting_missing_bulletin_reports_not_found() {
    let store = Store::open_in_memory().unwrap();
    assert!(matches!(
        store.delete_bulletin(42),
        Err(StoreError::NotFound(_))
    ));
    // Delete-by-uid of an absent record is a silent no-op.
    assert!(!store.delete_bulletin_by_uid("missing").unwrap());
}

#[test]
fn mail_recipient_isolation() {
    let store = Store::open_in_memory().unwrap();
    let to_alice = store
        .create_mail("!bob", "BOB", "!alice", "hi", "for alice", None, None)
        .unwrap();
    let to_carol = store
        .create_mail("!bob", "BOB", "!carol", "hi", "for carol", None, None)
        .unwrap();

    // Each recipient sees only their own mail, by listing and by id.
    assert_eq!(store.mail_for("!alice").unwrap().len(), 1);
    assert_eq!(store.mail_for("!carol").unwrap().len(), 1);
    assert!(store.mail_item(to_alice.id, "!alice").is_ok());
    assert!(matches!(
        store.mail_item(to_alice.id, "!carol"),
        Err(StoreError::NotFound(_))
    ));
    assert!(matches!(
        store.mail_item(to_carol.id, "!alice"),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn mail_delete_requires_the_recipient() {
    let store = Store::open_in_memory().unwrap();
    let mail = store
        .create_mail("!bob", "BOB", "!alice", "hi", "body", None, None)
        .unwrap();

    // Not even the sender may delete someone else's mail.
    assert!(matches!(
        store.delete_mail(&mail.unique_id, "!bob"),
        Err(StoreError::PermissionDenied(_))
    ));
    assert_eq!(store.mail_for("!alice").unwrap().len(), 1);

    store.delete_mail(&mail.unique_id, "!alice").unwrap();
    assert!(store.mail_for("!alice").unwrap().is_empty());

    // A second delete of the same uid is NotFound for the requester path.
    assert!(matches!(
        store.delete_mail(&mail.unique_id, "!alice"),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn mail_sender_lookup() {
    let store = Store::open_in_memory().unwrap();
    let mail = store
        .create_mail("!bob", "BOB", "!alice", "hi", "body", None, None)
        .unwrap();
    assert_eq!(store.mail_sender(mail.id).unwrap().as_deref(), Some("!bob"));
    assert_eq!(store.mail_sender(9999).unwrap(), None);
}

#[test]
fn channel_directory_is_append_only_and_allows_duplicates() {
    let store = Store::open_in_memory().unwrap();
    store.add_channel("Austin Mesh", "https://example.com/a").unwrap();
    store.add_channel("Austin Mesh", "https://example.com/b").unwrap();

    let channels = store.channels().unwrap();
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0].name, "Austin Mesh");
    assert_eq!(channels[1].url, "https://example.com/b");
}
