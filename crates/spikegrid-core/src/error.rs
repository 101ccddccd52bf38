//! Error types shared across the simulation kernel

use thiserror::Error;

/// Result type for kernel operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the simulation kernel
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Delay outside the admissible range
    #[error("Bad delay {delay_ms}ms: {reason}")]
    BadDelay {
        /// Offending delay in milliseconds
        delay_ms: f64,
        /// Why the delay was rejected
        reason: String,
    },

    /// Parameter value outside model-specific bounds
    #[error("Bad property {property}: {value} ({constraint})")]
    BadProperty {
        /// Property name
        property: String,
        /// Offending value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// List lengths in a connectivity or seed specification are inconsistent
    #[error("Dimension mismatch for {what}: got {got}, expected {expected}")]
    DimensionMismatch {
        /// What was being sized
        what: String,
        /// Actual length
        got: usize,
        /// Expected length
        expected: usize,
    },

    /// Model or synapse name already registered
    #[error("Name {name} is already in use")]
    NamingConflict {
        /// Conflicting name
        name: String,
    },

    /// Model name not registered
    #[error("Unknown model {name}")]
    UnknownModel {
        /// Requested model name
        name: String,
    },

    /// Receptor port not provided by the target model
    #[error("Unknown receptor port {port} on model {model}")]
    UnknownReceptor {
        /// Requested port
        port: u32,
        /// Target model name
        model: String,
    },

    /// Global node id does not exist
    #[error("Unknown node {gid}")]
    UnknownNode {
        /// Requested gid
        gid: u32,
    },

    /// Target cannot accept the event type of the synapse model
    #[error("Illegal connection: {reason}")]
    IllegalConnection {
        /// Why the connection is illegal
        reason: String,
    },

    /// A kernel-wide invariant was broken
    #[error("Kernel error: {reason}")]
    Kernel {
        /// Broken invariant
        reason: String,
    },

    /// Status dictionary keys were not read and `dict_miss_is_error` is set
    #[error("Unaccessed dictionary entries: {keys:?}")]
    UnaccessedDictionaryEntry {
        /// The unread keys
        keys: Vec<String>,
    },

    /// Failure inside the exchange transport
    #[error("Transport error: {reason}")]
    Transport {
        /// What went wrong
        reason: String,
    },
}

impl CoreError {
    /// Create a bad-delay error
    pub fn bad_delay(delay_ms: f64, reason: impl Into<String>) -> Self {
        Self::BadDelay {
            delay_ms,
            reason: reason.into(),
        }
    }

    /// Create a bad-property error
    pub fn bad_property(
        property: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::BadProperty {
            property: property.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }

    /// Create a dimension-mismatch error
    pub fn dimension_mismatch(what: impl Into<String>, got: usize, expected: usize) -> Self {
        Self::DimensionMismatch {
            what: what.into(),
            got,
            expected,
        }
    }

    /// Create a kernel-invariant error
    pub fn kernel(reason: impl Into<String>) -> Self {
        Self::Kernel {
            reason: reason.into(),
        }
    }

    /// Create an illegal-connection error
    pub fn illegal_connection(reason: impl Into<String>) -> Self {
        Self::IllegalConnection {
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CoreError::bad_delay(0.05, "below resolution");
        assert!(matches!(err, CoreError::BadDelay { .. }));

        let err = CoreError::dimension_mismatch("rng_seeds", 3, 4);
        assert!(matches!(err, CoreError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = CoreError::UnknownNode { gid: 42 };
        let msg = format!("{}", err);
        assert!(msg.contains("Unknown node 42"));
    }
}
