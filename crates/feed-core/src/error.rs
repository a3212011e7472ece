//! Error types for Feed Core
//!
//! Mirrors the taxonomy callers act on:
//! - validation errors, raised before any state mutation
//! - not-found, a typed "nothing to do" distinct from failures
//! - transient infrastructure errors (storage, bus, deadlines), retryable
//!
//! Push delivery failures are deliberately absent: they are reported as
//! [`DeliveryOutcome`](crate::session::DeliveryOutcome) values, never errors.

use crate::store::ShardId;
use feed_types::{ReleaseState, TypeError};
use std::path::PathBuf;

/// Main error type of the control plane
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Malformed request field
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Malformed identity, strategy or label expression
    #[error("validation failed: {0}")]
    Validation(#[from] TypeError),

    /// Referenced entity does not exist
    #[error("{kind} {id} does not exist")]
    NotFound {
        /// Entity kind (`release`, `multi-release`, `config`, `content`)
        kind: &'static str,
        /// Identifier as requested
        id: String,
    },

    /// Release is not eligible for pull or reload
    #[error("{target} is {state}, expected published or rollbacked")]
    InvalidState {
        /// What was checked, e.g. `release 12`
        target: String,
        /// Its current state
        state: ReleaseState,
    },

    /// Storage collaborator failed
    #[error("storage error: {0}")]
    Store(StoreError),

    /// Signal bus failed
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Caller supplied deadline elapsed
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout {
        /// Operation that was abandoned
        operation: &'static str,
        /// Deadline in milliseconds
        after_ms: u64,
    },
}

impl FeedError {
    /// Whether this is a typed "non-existent" result
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the caller may retry on its own schedule
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Bus(_) | Self::Timeout { .. })
    }

    /// Whether the request itself was rejected
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::Validation(_) | Self::InvalidState { .. }
        )
    }
}

impl From<StoreError> for FeedError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { kind, id } => Self::NotFound { kind, id },
            other => Self::Store(other),
        }
    }
}

/// Storage collaborator errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No such row
    #[error("{kind} {id} not found")]
    NotFound {
        /// Entity kind
        kind: &'static str,
        /// Identifier
        id: String,
    },

    /// Shard could not be reached
    #[error("shard {shard} unavailable: {reason}")]
    Unavailable {
        /// Shard resolved from the business id
        shard: ShardId,
        /// Driver message
        reason: String,
    },
}

/// Signal bus errors
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Subscriber side has gone away
    #[error("bus closed")]
    Closed,

    /// Signal could not be serialised
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        /// Path attempted
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// TOML syntax or type error
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Semantically invalid value
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_typed_not_found() {
        let err: FeedError = StoreError::NotFound {
            kind: "release",
            id: "7".into(),
        }
        .into();
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "release 7 does not exist");
    }

    #[test]
    fn transient_errors_are_retryable() {
        let err: FeedError = StoreError::Unavailable {
            shard: ShardId(2),
            reason: "connection refused".into(),
        }
        .into();
        assert!(err.is_retryable());
        assert!(FeedError::Timeout {
            operation: "pull",
            after_ms: 10
        }
        .is_retryable());
        assert!(FeedError::Bus(BusError::Closed).is_retryable());
    }

    #[test]
    fn validation_errors() {
        let err = FeedError::InvalidState {
            target: "release 3".into(),
            state: ReleaseState::Created,
        };
        assert!(err.is_validation());
        assert!(err.to_string().contains("created"));
        assert!(FeedError::from(TypeError::EmptyPredicate).is_validation());
    }
}
