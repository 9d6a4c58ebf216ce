//! Delivery scenario tests
//!
//! End-to-end flows through the chat router: offline queueing, reconnect
//! reconciliation, live edits and deletes, concurrent senders, failed
//! persistence, multi-device delivery and per-user message state.

use pretty_assertions::assert_eq;
use std::time::Duration;
use xfchat::backend::error::ChatError;
use xfchat::shared::event::{ClientEvent, DeleteMode, ServerEvent};
use xfchat::shared::messaging::MessageState;

use crate::common::{test_config, test_user, TestChat};
use crate::{assert_err, assert_event, assert_ok};

#[tokio::test]
async fn test_offline_send_reconcile_then_live_edit() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;

    let mut a = chat.connect(alice).await;
    a.send_text(conversation_id, "hi").await;
    assert_event!(a.recv().await, ServerEvent::Accepted { sequence: 1, .. });
    assert_eq!(chat.router.queue().len(bob.user_id), 1);

    let mut b = chat.connect(bob).await;
    assert_eq!(b.pending.len(), 1);
    assert_eq!(b.pending[0].conversation_id, conversation_id);
    assert_eq!((b.pending[0].lowest, b.pending[0].highest), (1, 1));

    b.submit(ClientEvent::Reconcile {
        conversation_id,
        last_seen: 0,
    })
    .await;
    let envelope = assert_event!(b.recv().await, ServerEvent::Message(envelope) => envelope);
    assert_eq!(envelope.sequence, 1);
    assert_eq!(envelope.body.as_deref(), Some("hi"));
    assert_event!(b.recv().await, ServerEvent::Reconciled { through: 1, .. });
    assert!(chat.router.queue().is_empty(bob.user_id));

    a.submit(ClientEvent::Edit {
        conversation_id,
        sequence: 1,
        body: "hello".to_string(),
    })
    .await;
    let edited = assert_event!(b.recv().await, ServerEvent::Edited(envelope) => envelope);
    assert_eq!(edited.sequence, 1);
    assert_eq!(edited.body.as_deref(), Some("hello"));
    assert_eq!(edited.state, MessageState::Edited);
    assert!(edited.edited_at.is_some());
    assert!(chat.router.queue().is_empty(bob.user_id));
}

#[tokio::test]
async fn test_deleted_message_reconciles_as_tombstone() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;

    assert_ok!(chat.router.send(alice, conversation_id, "oops").await);
    assert_ok!(chat.router.delete(alice, conversation_id, 1).await);

    let mut b = chat.connect(bob).await;
    b.submit(ClientEvent::Reconcile {
        conversation_id,
        last_seen: 0,
    })
    .await;
    let envelope = assert_event!(b.recv().await, ServerEvent::Message(envelope) => envelope);
    assert_eq!(envelope.sequence, 1);
    assert_eq!(envelope.state, MessageState::Deleted);
    assert_eq!(envelope.body, None);
    assert_event!(b.recv().await, ServerEvent::Reconciled { through: 1, .. });
}

#[tokio::test]
async fn test_concurrent_senders_get_distinct_ordered_sequences() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;
    assert_ok!(chat.router.send(alice, conversation_id, "first").await);

    let router_a = chat.router.clone();
    let router_b = chat.router.clone();
    let (from_a, from_b) = tokio::join!(
        tokio::spawn(async move { router_a.send(alice, conversation_id, "from a").await }),
        tokio::spawn(async move { router_b.send(bob, conversation_id, "from b").await }),
    );
    let mut sequences = vec![
        assert_ok!(assert_ok!(from_a)).sequence,
        assert_ok!(assert_ok!(from_b)).sequence,
    ];
    sequences.sort_unstable();
    assert_eq!(sequences, vec![2, 3]);
}

#[tokio::test]
async fn test_live_order_matches_sequence_order() {
    let chat = TestChat::new();
    let (alice, bob, carol) = (test_user(), test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob, carol]).await;
    let mut c = chat.connect(carol).await;

    let mut tasks = Vec::new();
    for (index, sender) in [alice, bob, alice, bob, alice, bob].into_iter().enumerate() {
        let router = chat.router.clone();
        tasks.push(tokio::spawn(async move {
            router.send(sender, conversation_id, &format!("message {}", index)).await
        }));
    }
    for task in tasks {
        assert_ok!(assert_ok!(task.await));
    }

    let received: Vec<u64> = c
        .drain()
        .iter()
        .filter_map(|event| event.envelope().map(|envelope| envelope.sequence))
        .collect();
    assert_eq!(received, (1..=6).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_edit_after_delete_is_invalid_state() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;
    let mut a = chat.connect(alice).await;

    assert_ok!(chat.router.send(alice, conversation_id, "gone soon").await);
    assert_ok!(chat.router.delete(alice, conversation_id, 1).await);

    a.submit(ClientEvent::Edit {
        conversation_id,
        sequence: 1,
        body: "too late".to_string(),
    })
    .await;
    let code = assert_event!(a.recv().await, ServerEvent::Error { code, sequence: Some(1), .. } => code);
    assert_eq!(code, "invalid_state");

    assert_err!(
        chat.router.edit(alice, conversation_id, 1, "still too late").await,
        ChatError::InvalidState {
            state: MessageState::Deleted,
            ..
        }
    );
}

#[tokio::test]
async fn test_two_connections_each_receive_once() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;
    let mut phone = chat.connect(bob).await;
    let mut laptop = chat.connect(bob).await;

    for body in ["one", "two"] {
        assert_ok!(chat.router.send(alice, conversation_id, body).await);
    }

    for device in [&mut phone, &mut laptop] {
        let sequences: Vec<u64> = device
            .drain()
            .iter()
            .filter_map(|event| event.envelope().map(|envelope| envelope.sequence))
            .collect();
        assert_eq!(sequences, vec![1, 2]);
    }
    assert!(chat.router.queue().is_empty(bob.user_id));
}

#[tokio::test]
async fn test_non_participant_is_rejected_without_side_effects() {
    let chat = TestChat::new();
    let (alice, bob, mallory) = (test_user(), test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;
    let mut m = chat.connect(mallory).await;

    m.send_text(conversation_id, "let me in").await;
    let code = assert_event!(m.recv().await, ServerEvent::Error { code, .. } => code);
    assert_eq!(code, "not_participant");

    m.submit(ClientEvent::Reconcile {
        conversation_id,
        last_seen: 0,
    })
    .await;
    let code = assert_event!(m.recv().await, ServerEvent::Error { code, .. } => code);
    assert_eq!(code, "not_participant");

    assert!(chat.router.queue().is_empty(bob.user_id));
    assert_eq!(chat.storage.inner().message_count(conversation_id).await, 0);
}

#[tokio::test]
async fn test_invalid_body_is_rejected() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;
    let mut a = chat.connect(alice).await;

    a.send_text(conversation_id, "   ").await;
    let code = assert_event!(a.recv().await, ServerEvent::Error { code, .. } => code);
    assert_eq!(code, "invalid_body");

    let too_long = "x".repeat(chat.router.config().max_body_chars + 1);
    a.send_text(conversation_id, &too_long).await;
    let code = assert_event!(a.recv().await, ServerEvent::Error { code, .. } => code);
    assert_eq!(code, "invalid_body");

    assert_eq!(chat.storage.create_calls(), 0);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;

    chat.storage.fail_next(2);
    let message = assert_ok!(chat.router.send(alice, conversation_id, "persistent").await);
    assert_eq!(message.sequence, 1);
    assert_eq!(chat.storage.create_calls(), 3);
}

#[tokio::test]
async fn test_failed_send_leaves_tombstone_not_gap() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;
    let mut a = chat.connect(alice).await;

    // 3 attempts for the message, then the tombstone goes through
    chat.storage.fail_next(3);
    a.send_text(conversation_id, "lost").await;
    let (code, sequence) = assert_event!(
        a.recv().await,
        ServerEvent::Error { code, sequence, .. } => (code, sequence)
    );
    assert_eq!(code, "persistence_failed");
    assert_eq!(sequence, Some(1));

    let next = assert_ok!(chat.router.send(alice, conversation_id, "kept").await);
    assert_eq!(next.sequence, 2);

    let history = assert_ok!(chat.router.history(bob.user_id, conversation_id, None, None).await);
    assert_eq!(history.messages.len(), 2);
    assert!(history.messages[0].is_tombstone());
    assert_eq!(history.messages[1].body, "kept");
}

#[tokio::test]
async fn test_deferred_tombstone_is_written_by_next_send() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;

    chat.storage.set_outage(true);
    assert_err!(
        chat.router.send(alice, conversation_id, "during outage").await,
        ChatError::Persistence {
            sequence: Some(1),
            attempts: 3,
            ..
        }
    );
    assert_eq!(chat.storage.inner().message_count(conversation_id).await, 0);

    // Reconciling during the outage still sees sequence 1, as a tombstone
    let mut b = chat.connect(bob).await;
    b.submit(ClientEvent::Reconcile {
        conversation_id,
        last_seen: 0,
    })
    .await;
    let envelope = assert_event!(b.recv().await, ServerEvent::Message(envelope) => envelope);
    assert_eq!(envelope.sequence, 1);
    assert_eq!(envelope.state, MessageState::Deleted);
    assert_eq!(envelope.sender, alice.user_id);
    assert_event!(b.recv().await, ServerEvent::Reconciled { through: 1, .. });

    chat.storage.set_outage(false);
    let message = assert_ok!(chat.router.send(alice, conversation_id, "after outage").await);
    assert_eq!(message.sequence, 2);
    assert_eq!(chat.storage.inner().message_count(conversation_id).await, 2);
}

#[tokio::test]
async fn test_reconcile_ahead_of_server_asks_for_resync() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;
    assert_ok!(chat.router.send(alice, conversation_id, "one").await);
    let mut b = chat.connect(bob).await;

    b.submit(ClientEvent::Reconcile {
        conversation_id,
        last_seen: 7,
    })
    .await;
    assert_event!(
        b.recv().await,
        ServerEvent::Resync { next_sequence: 2, .. }
    );

    // The connection stays usable
    b.submit(ClientEvent::Heartbeat).await;
    assert_event!(b.recv().await, ServerEvent::HeartbeatAck);
}

#[tokio::test]
async fn test_reconcile_replays_missed_edit_of_seen_message() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;

    let mut b = chat.connect(bob).await;
    assert_ok!(chat.router.send(alice, conversation_id, "draft").await);
    assert_event!(b.recv().await, ServerEvent::Message(_));
    b.disconnect().await;

    assert_ok!(chat.router.edit(alice, conversation_id, 1, "final").await);
    assert_eq!(chat.router.queue().len(bob.user_id), 1);

    let mut b = chat.connect(bob).await;
    b.submit(ClientEvent::Reconcile {
        conversation_id,
        last_seen: 1,
    })
    .await;
    let envelope = assert_event!(b.recv().await, ServerEvent::Edited(envelope) => envelope);
    assert_eq!(envelope.body.as_deref(), Some("final"));
    assert_event!(b.recv().await, ServerEvent::Reconciled { through: 1, .. });
    assert!(chat.router.queue().is_empty(bob.user_id));
}

#[tokio::test]
async fn test_ack_clears_queue_once() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;
    for body in ["a", "b", "c"] {
        assert_ok!(chat.router.send(alice, conversation_id, body).await);
    }

    let b = chat.connect(bob).await;
    b.submit(ClientEvent::Ack {
        conversation_id,
        sequence: 2,
    })
    .await;
    assert_eq!(chat.router.queue().len(bob.user_id), 1);
    b.submit(ClientEvent::Ack {
        conversation_id,
        sequence: 2,
    })
    .await;
    assert_eq!(chat.router.queue().len(bob.user_id), 1);
    assert_eq!(chat.router.acknowledge(bob.user_id, conversation_id, 3), 1);
}

#[tokio::test]
async fn test_backlog_arrives_before_live_traffic() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;
    let mut a = chat.connect(alice).await;

    a.send_text(conversation_id, "sent while away").await;
    assert_event!(a.recv().await, ServerEvent::Accepted { sequence: 1, .. });

    let mut b = chat.connect(bob).await;
    a.send_text(conversation_id, "sent after connect").await;
    assert_event!(a.recv().await, ServerEvent::Accepted { sequence: 2, .. });
    b.assert_idle();

    b.submit(ClientEvent::Reconcile {
        conversation_id,
        last_seen: 0,
    })
    .await;
    let first = assert_event!(b.recv().await, ServerEvent::Message(envelope) => envelope);
    let second = assert_event!(b.recv().await, ServerEvent::Message(envelope) => envelope);
    assert_eq!((first.sequence, second.sequence), (1, 2));
    assert_event!(b.recv().await, ServerEvent::Reconciled { through: 2, .. });
    b.assert_idle();
    assert!(chat.router.queue().is_empty(bob.user_id));
}

#[tokio::test]
async fn test_stalled_reader_does_not_block_senders() {
    let mut config = test_config();
    config.outbound_buffer = 2;
    let chat = TestChat::with_config(config);
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;
    for index in 1..=5 {
        assert_ok!(chat.router.send(alice, conversation_id, &format!("backlog {}", index)).await);
    }

    let mut b = chat.connect(bob).await;
    let router = chat.router.clone();
    let handle = b.handle.clone();
    let catching_up = tokio::spawn(async move { router.reconcile(&handle, conversation_id, 0).await });
    // let the reconcile fill bob's buffer and stall
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = tokio::time::timeout(
        Duration::from_secs(2),
        chat.router.send(alice, conversation_id, "while bob is stalled"),
    )
    .await;
    let message = assert_ok!(assert_ok!(sent, "Send waited on a stalled reader"));
    assert_eq!(message.sequence, 6);

    let mut sequences = Vec::new();
    loop {
        match b.recv().await {
            ServerEvent::Message(envelope) => sequences.push(envelope.sequence),
            ServerEvent::Reconciled { through, .. } => {
                assert_eq!(through, 6);
                break;
            }
            other => panic!("Unexpected event {:?}", other),
        }
    }
    assert_eq!(sequences, (1..=6).collect::<Vec<_>>());

    let summary = assert_ok!(assert_ok!(catching_up.await));
    assert!(summary.complete);
    assert!(chat.router.queue().is_empty(bob.user_id));
}

#[tokio::test]
async fn test_delete_for_self_over_the_wire() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;
    let mut a = chat.connect(alice).await;
    let mut b = chat.connect(bob).await;

    a.send_text(conversation_id, "for both of us").await;
    assert_event!(a.recv().await, ServerEvent::Accepted { sequence: 1, .. });
    assert_event!(b.recv().await, ServerEvent::Message(_));

    b.submit(ClientEvent::Delete {
        conversation_id,
        sequence: 1,
        mode: DeleteMode::ForSelf,
    })
    .await;
    let envelope = assert_event!(b.recv().await, ServerEvent::Deleted(envelope) => envelope);
    assert_eq!(envelope.sequence, 1);
    assert_eq!(envelope.body, None);
    a.assert_idle();

    b.submit(ClientEvent::Delete {
        conversation_id,
        sequence: 1,
        mode: DeleteMode::ForSelf,
    })
    .await;
    let code = assert_event!(b.recv().await, ServerEvent::Error { code, .. } => code);
    assert_eq!(code, "invalid_state");

    let history = assert_ok!(chat.router.history(alice.user_id, conversation_id, None, None).await);
    assert_eq!(history.messages[0].body, "for both of us");
    let history = assert_ok!(chat.router.history(bob.user_id, conversation_id, None, None).await);
    assert!(history.messages[0].is_tombstone());
}

#[tokio::test]
async fn test_read_receipts_reach_connected_participants() {
    let chat = TestChat::new();
    let (alice, bob) = (test_user(), test_user());
    let conversation_id = chat.conversation(&[alice, bob]).await;
    let mut a = chat.connect(alice).await;
    let mut b = chat.connect(bob).await;
    for body in ["one", "two"] {
        assert_ok!(chat.router.send(alice, conversation_id, body).await);
    }
    assert_eq!(b.drain().len(), 2);

    b.submit(ClientEvent::Read {
        conversation_id,
        sequence: 2,
    })
    .await;
    let (reader, through) = assert_event!(
        a.recv().await,
        ServerEvent::Read { user_id, through, .. } => (user_id, through)
    );
    assert_eq!((reader, through), (bob.user_id, 2));
    b.assert_idle();

    b.submit(ClientEvent::Read {
        conversation_id,
        sequence: 1,
    })
    .await;
    a.assert_idle();

    b.submit(ClientEvent::Read {
        conversation_id,
        sequence: 9,
    })
    .await;
    let code = assert_event!(b.recv().await, ServerEvent::Error { code, .. } => code);
    assert_eq!(code, "message_not_found");
    assert!(chat.router.queue().is_empty(alice.user_id));
}
