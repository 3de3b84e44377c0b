//! Error types for the reactive graph.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Everything that can go wrong while reading, writing or running nodes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A node read itself (directly or through a chain) while it was running.
    #[error("cycle detected: {node} was read while it was running")]
    CycleDetected {
        /// Debug description of the node involved.
        node: String,
    },

    /// The handle points at a node that has been disposed.
    #[error("access to disposed node {node}")]
    Disposed {
        /// Debug description of the node involved.
        node: String,
    },

    /// A derived compute function panicked. The node stays outdated and is
    /// retried on the next read.
    #[error("compute of {node} panicked: {message}")]
    Compute {
        /// Debug description of the node involved.
        node: String,
        /// Panic payload rendered as text.
        message: String,
    },

    /// A consumer body, cleanup or subscriber callback panicked.
    #[error("listener {node} panicked: {message}")]
    Listener {
        /// Debug description of the node involved.
        node: String,
        /// Panic payload rendered as text.
        message: String,
    },

    /// Consumers kept re-notifying each other past the configured limit.
    #[error("flush did not settle after {iterations} iterations")]
    FlushLimit {
        /// Number of flush rounds performed before giving up.
        iterations: usize,
    },
}

impl ReactiveError {
    /// Whether the graph stays fully usable after this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Disposed { .. })
    }
}

/// Render a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_handles_common_payloads() {
        let caught = std::panic::catch_unwind(|| panic!("boom")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom");

        let caught = std::panic::catch_unwind(|| panic!("value {}", 7)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "value 7");

        let caught = std::panic::catch_unwind(|| std::panic::panic_any(42u8)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "non-string panic payload");
    }

    #[test]
    fn display_names_the_node() {
        let err = ReactiveError::CycleDetected {
            node: "Derived(3v1)".into(),
        };
        assert_eq!(
            err.to_string(),
            "cycle detected: Derived(3v1) was read while it was running"
        );
        assert!(err.is_recoverable());
        assert!(!ReactiveError::Disposed { node: "x".into() }.is_recoverable());
    }
}
