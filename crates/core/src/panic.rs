//! Panic payload helpers shared by the task-spawning primitives

use std::any::Any;

/// Render a `catch_unwind` payload as text.
///
/// `panic!` with a literal yields `&'static str`, a formatted message yields
/// `String`; anything else is reported generically.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => match payload.downcast::<&'static str>() {
            Ok(message) => (*message).to_string(),
            Err(_) => "non-string panic payload".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{catch_unwind, panic_any};

    use super::*;

    /// Validates `panic_message` across the payload shapes `panic!` produces.
    ///
    /// Assertions:
    /// - Confirms literal and formatted messages are preserved.
    /// - Confirms other payloads get the generic description.
    #[test]
    fn test_panic_message_payload_shapes() {
        let literal = catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(literal), "boom");

        let formatted = catch_unwind(|| panic!("job {} failed", 7)).unwrap_err();
        assert_eq!(panic_message(formatted), "job 7 failed");

        let other = catch_unwind(|| panic_any(42_u8)).unwrap_err();
        assert_eq!(panic_message(other), "non-string panic payload");
    }
}
