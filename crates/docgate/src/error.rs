// Error taxonomy for pool and gateway
//
// Decision: Transport and process failures are reclassified as InstanceCrashed, never swallowed
// Decision: Engine failures keep the engine's own code so callers can branch on it

use std::fmt;
use std::time::Duration;

use docgate_protocol::{EngineError, ErrorCode, HandleKind, InstanceId, Reference};

use crate::config::PoolMode;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a reference was refused before it reached the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleFault {
    /// Issued by an instance other than the one it was presented to.
    ForeignInstance { presented_to: InstanceId },
    /// Closed explicitly, closed with its parent, or never issued here.
    Released,
    /// The owning instance was closed or crashed.
    Revoked,
    /// The id is live but names a different kind of resource.
    KindMismatch { actual: HandleKind },
}

impl fmt::Display for HandleFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleFault::ForeignInstance { presented_to } => {
                write!(f, "not issued by instance {}", presented_to)
            }
            HandleFault::Released => f.write_str("was released"),
            HandleFault::Revoked => f.write_str("owning instance is gone"),
            HandleFault::KindMismatch { actual } => write!(f, "refers to a {}", actual),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No instance became available before the deadline.
    #[error("no instance available within {waited:?}")]
    AcquireTimeout { waited: Duration },

    /// The serving instance died. The call's work is lost.
    #[error("instance {instance} crashed: {reason}")]
    InstanceCrashed { instance: InstanceId, reason: String },

    #[error("invalid handle {reference}: {fault}")]
    InvalidHandle {
        reference: Reference,
        fault: HandleFault,
    },

    /// Needs same-process semantics the instance cannot offer.
    #[error("{operation} is not available on {mode} instances")]
    ModeUnsupported {
        operation: &'static str,
        mode: PoolMode,
    },

    /// The engine itself rejected the operation.
    #[error("{operation} failed: {source}")]
    Engine {
        operation: &'static str,
        #[source]
        source: EngineError,
    },

    #[error("pool is closed")]
    PoolClosed,

    /// The caller already gave this instance back.
    #[error("instance {0} was already released")]
    InstanceClosed(InstanceId),

    #[error("failed to start worker: {0}")]
    Spawn(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("shutdown did not finish within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// True when a fresh acquire may succeed where this attempt failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::AcquireTimeout { .. } | Error::InstanceCrashed { .. }
        )
    }

    /// The engine's code, for engine failures only.
    pub fn engine_code(&self) -> Option<ErrorCode> {
        match self {
            Error::Engine { source, .. } => Some(source.code),
            _ => None,
        }
    }

    pub(crate) fn crashed(instance: InstanceId, reason: impl Into<String>) -> Self {
        Error::InstanceCrashed {
            instance,
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_handle(reference: Reference, fault: HandleFault) -> Self {
        Error::InvalidHandle { reference, fault }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeouts_and_crashes_are_retryable() {
        let instance = InstanceId::new();
        assert!(Error::AcquireTimeout {
            waited: Duration::ZERO
        }
        .is_retryable());
        assert!(Error::crashed(instance, "gone").is_retryable());
        assert!(!Error::PoolClosed.is_retryable());
        assert!(!Error::Engine {
            operation: "OpenDocument",
            source: EngineError::new(ErrorCode::Password, "password required"),
        }
        .is_retryable());
    }

    #[test]
    fn test_engine_code_exposed() {
        let err = Error::Engine {
            operation: "OpenDocument",
            source: EngineError::format("not a PDF"),
        };
        assert_eq!(err.engine_code(), Some(ErrorCode::Format));
        assert_eq!(Error::PoolClosed.engine_code(), None);
    }

    #[test]
    fn test_invalid_handle_message_names_both_instances() {
        let owner = InstanceId::new();
        let serving = InstanceId::new();
        let reference = Reference::new(owner, 4, HandleKind::Page);
        let err = Error::invalid_handle(
            reference,
            HandleFault::ForeignInstance {
                presented_to: serving,
            },
        );
        let message = err.to_string();
        assert!(message.contains(&owner.to_string()));
        assert!(message.contains(&serving.to_string()));
    }
}
