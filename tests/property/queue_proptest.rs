//! Property-based tests for the delivery queue

use proptest::prelude::*;
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;
use xfchat::backend::delivery::DeliveryQueue;
use xfchat::shared::messaging::MessageRef;

const RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

fn conversations() -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    ids.sort();
    ids
}

proptest! {
    #[test]
    fn test_drain_is_sorted_and_deduplicated(
        entries in prop::collection::vec((0usize..3, 1u64..50), 0..60),
    ) {
        let queue = DeliveryQueue::new(RETENTION);
        let user = Uuid::new_v4();
        let ids = conversations();

        let mut expected = BTreeSet::new();
        for (conversation, sequence) in &entries {
            let reference = MessageRef::new(ids[*conversation], *sequence);
            queue.enqueue(user, reference);
            expected.insert(reference);
        }

        let drained: Vec<MessageRef> = queue.drain(user).collect();
        prop_assert_eq!(drained, expected.into_iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_acknowledge_is_idempotent(
        sequences in prop::collection::btree_set(1u64..100, 0..40),
        up_to in 0u64..120,
    ) {
        let queue = DeliveryQueue::new(RETENTION);
        let user = Uuid::new_v4();
        let conversation = Uuid::new_v4();
        for sequence in &sequences {
            queue.enqueue(user, MessageRef::new(conversation, *sequence));
        }

        let removed = queue.acknowledge(user, conversation, up_to);
        prop_assert_eq!(removed, sequences.iter().filter(|s| **s <= up_to).count());
        let after_first: Vec<MessageRef> = queue.drain(user).collect();

        prop_assert_eq!(queue.acknowledge(user, conversation, up_to), 0);
        let after_second: Vec<MessageRef> = queue.drain(user).collect();
        prop_assert_eq!(&after_first, &after_second);
        prop_assert!(after_second.iter().all(|r| r.sequence > up_to));
    }

    #[test]
    fn test_acknowledge_leaves_other_conversations_alone(
        sequences in prop::collection::btree_set(1u64..50, 1..20),
    ) {
        let queue = DeliveryQueue::new(RETENTION);
        let user = Uuid::new_v4();
        let ids = conversations();
        for sequence in &sequences {
            for id in &ids {
                queue.enqueue(user, MessageRef::new(*id, *sequence));
            }
        }

        queue.acknowledge(user, ids[1], u64::MAX);
        prop_assert_eq!(queue.drain_conversation(user, ids[1]).count(), 0);
        prop_assert_eq!(queue.drain_conversation(user, ids[0]).count(), sequences.len());
        prop_assert_eq!(queue.drain_conversation(user, ids[2]).count(), sequences.len());
    }
}
