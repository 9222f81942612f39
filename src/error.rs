//! Errors reported by mutation tasks and the attribute safety gate.

use std::any::Any;
use std::error::Error as StdError;

use thiserror::Error;

/// Why a submitted mutation did not produce a value.
///
/// Scoped to the one task that failed; sibling tasks in the same flush are
/// unaffected.
#[derive(Debug, Error)]
pub enum MutationError {
    /// The callback returned an error.
    #[error("mutation failed: {0}")]
    Failed(#[source] Box<dyn StdError>),

    /// The callback panicked. Holds the panic message when it was a string.
    #[error("mutation panicked: {0}")]
    Panicked(String),
}

impl MutationError {
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_owned(),
                Err(_) => String::from("non-string panic payload"),
            },
        };
        Self::Panicked(message)
    }
}

/// An attribute write rejected by the safety gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The attribute name looks like an inline event handler (`on*`).
    #[error("unsafe attribute: {name}")]
    UnsafeAttribute {
        /// Rejected attribute name.
        name: String,
    },

    /// The value resolves to a denied URL scheme.
    #[error("unsafe URL for {attribute}: {value}")]
    UnsafeUrl {
        /// Attribute the value was meant for.
        attribute: String,
        /// Rejected value.
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_messages() {
        let owned = MutationError::from_panic(Box::new(String::from("boom")));
        let borrowed = MutationError::from_panic(Box::new("bang"));
        let opaque = MutationError::from_panic(Box::new(7_u8));

        assert_eq!(owned.to_string(), "mutation panicked: boom");
        assert_eq!(borrowed.to_string(), "mutation panicked: bang");
        assert_eq!(opaque.to_string(), "mutation panicked: non-string panic payload");
    }

    #[test]
    fn failed_mutation_exposes_source() {
        let error = MutationError::Failed("detached node".into());

        assert_eq!(error.to_string(), "mutation failed: detached node");
        assert!(error.source().is_some());
    }

    #[test]
    fn validation_messages_name_the_attribute() {
        let error = ValidationError::UnsafeUrl {
            attribute: "href".into(),
            value: "https://evil.test/x".into(),
        };

        assert_eq!(error.to_string(), "unsafe URL for href: https://evil.test/x");
    }
}
