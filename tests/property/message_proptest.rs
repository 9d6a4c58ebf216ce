//! Property-based tests for message bodies and state transitions

use proptest::prelude::*;
use uuid::Uuid;
use xfchat::shared::messaging::{validate_body, Message, MessageState};

fn transition() -> impl Strategy<Value = MessageState> {
    prop_oneof![Just(MessageState::Edited), Just(MessageState::Deleted)]
}

proptest! {
    #[test]
    fn test_validated_body_respects_policy(raw in "\\PC{0,64}", max in 1usize..40) {
        if let Ok(body) = validate_body(&raw, max) {
            prop_assert!(!body.is_empty());
            prop_assert!(body.chars().count() <= max);
            prop_assert_eq!(body.trim(), body.as_str());
        }
    }

    #[test]
    fn test_deleted_is_terminal(steps in prop::collection::vec(transition(), 1..8)) {
        let mut message = Message::new(Uuid::new_v4(), 1, Uuid::new_v4(), "body".to_string());
        let mut deleted = false;

        for step in steps {
            let result = match step {
                MessageState::Edited => message.apply_edit("edited".to_string()),
                _ => message.apply_delete(),
            };
            if deleted {
                prop_assert_eq!(result, Err(MessageState::Deleted));
            }
            deleted |= step == MessageState::Deleted;
        }

        if deleted {
            prop_assert!(message.is_tombstone());
            prop_assert!(message.body.is_empty());
        }
    }
}
