//! Custom assertion macros and utilities
//!
//! Provides enhanced assertion macros for better test output and
//! more descriptive error messages.

/// Assert that a result is ok and return the value
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $message:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $message, e),
        }
    };
}

/// Assert that a result is an error, optionally of a given shape
#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        assert!($result.is_err(), "Expected Err, got Ok");
    };
    ($result:expr, $pattern:pat) => {
        match $result {
            Err($pattern) => {}
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => panic!("Expected different error variant, got: {:?}", e),
        }
    };
}

/// Assert that an event matches a pattern and evaluate to the bound value
///
/// ```ignore
/// let envelope = assert_event!(client.recv().await, ServerEvent::Message(envelope) => envelope);
/// ```
#[macro_export]
macro_rules! assert_event {
    ($event:expr, $pattern:pat => $value:expr) => {
        match $event {
            $pattern => $value,
            other => panic!("Expected {}, got {:?}", stringify!($pattern), other),
        }
    };
    ($event:expr, $pattern:pat) => {
        match $event {
            $pattern => {}
            other => panic!("Expected {}, got {:?}", stringify!($pattern), other),
        }
    };
}

/// Assert that a string contains a substring
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {
        assert!(
            $haystack.contains($needle),
            "Expected '{}' to contain '{}'",
            $haystack,
            $needle
        );
    };
}
