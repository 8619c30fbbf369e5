//! Execution contexts: one logical engine instance each.
//!
//! ```text
//!                    ┌──────────────────────────────┐
//!   invoke(Request) ─┤ ExecutionContext             │
//!                    │  ├─ DirectContext   (lock +  │──► Engine (same process)
//!                    │  │                  blocking │
//!                    │  │                  thread)  │
//!                    │  └─ IsolatedContext (gRPC)   │──► docgate-worker ──► Engine
//!                    └──────────────────────────────┘
//! ```
//!
//! Both honor the same contract: one operation at a time, engine failures
//! surface as [`Error::Engine`], loss of the engine surfaces as
//! [`Error::InstanceCrashed`] and leaves the context permanently crashed.

mod direct;
mod isolated;

pub use direct::DirectContext;
pub use isolated::IsolatedContext;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use docgate_engine::{LocalRequest, LocalResponse};
use docgate_protocol::{InstanceId, Request, Response};
use parking_lot::Mutex;
use tracing::warn;

use crate::config::PoolMode;
use crate::error::{Error, Result};
use crate::registry::HandleRegistry;

/// Lifecycle of an instance. `Crashed` and `Closed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Spawning,
    Healthy,
    Crashed,
    Closed,
}

impl Liveness {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Liveness::Crashed | Liveness::Closed)
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Liveness::Spawning => "spawning",
            Liveness::Healthy => "healthy",
            Liveness::Crashed => "crashed",
            Liveness::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[async_trait]
pub trait ExecutionContext: Send + Sync {
    fn id(&self) -> InstanceId;

    fn mode(&self) -> PoolMode;

    fn liveness(&self) -> Liveness;

    /// Whether readers and callback functions can be handed to the engine.
    fn supports_local_callbacks(&self) -> bool {
        self.mode() == PoolMode::Direct
    }

    fn registry(&self) -> &Arc<HandleRegistry>;

    /// Runs one catalog operation.
    async fn invoke(&self, request: Request) -> Result<Response>;

    /// Runs one in-process-only operation.
    async fn invoke_local(&self, request: LocalRequest) -> Result<LocalResponse>;

    /// Cheap liveness probe. Marks the context crashed on failure.
    async fn check_health(&self) -> Result<()>;

    /// Tears the instance down. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Liveness and handle table shared by a context and its background tasks.
#[derive(Debug)]
pub(crate) struct InstanceState {
    id: InstanceId,
    liveness: Mutex<Liveness>,
    registry: Arc<HandleRegistry>,
}

impl InstanceState {
    pub fn new(id: InstanceId, liveness: Liveness) -> Self {
        Self {
            id,
            liveness: Mutex::new(liveness),
            registry: Arc::new(HandleRegistry::new(id)),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    pub fn get(&self) -> Liveness {
        *self.liveness.lock()
    }

    pub fn set_healthy(&self) {
        let mut liveness = self.liveness.lock();
        if *liveness == Liveness::Spawning {
            *liveness = Liveness::Healthy;
        }
    }

    /// Fails unless the instance can take another call.
    pub fn ensure_live(&self) -> Result<()> {
        match self.get() {
            Liveness::Crashed => Err(Error::crashed(self.id, "instance already crashed")),
            Liveness::Closed => Err(Error::InstanceClosed(self.id)),
            Liveness::Spawning | Liveness::Healthy => Ok(()),
        }
    }

    /// Moves to `Crashed` (unless already terminal), revokes every handle
    /// and returns the error to hand the caller.
    pub fn crash(&self, reason: impl Into<String>) -> Error {
        let reason = reason.into();
        let mut liveness = self.liveness.lock();
        if !liveness.is_terminal() {
            warn!(instance_id = %self.id, reason = %reason, "Instance crashed");
            *liveness = Liveness::Crashed;
        }
        drop(liveness);
        self.registry.revoke();
        Error::crashed(self.id, reason)
    }

    /// Moves to `Closed` and returns the previous state.
    pub fn close(&self) -> Liveness {
        let mut liveness = self.liveness.lock();
        let previous = *liveness;
        if previous != Liveness::Crashed {
            *liveness = Liveness::Closed;
        }
        drop(liveness);
        self.registry.revoke();
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgate_protocol::DocumentRef;

    #[test]
    fn test_crash_revokes_handles_and_sticks() {
        let state = InstanceState::new(InstanceId::new(), Liveness::Healthy);
        let document = DocumentRef::new(state.id(), 1);
        state.registry().record(document.reference(), None);

        let err = state.crash("connection reset");
        assert!(matches!(err, Error::InstanceCrashed { .. }));
        assert_eq!(state.get(), Liveness::Crashed);
        assert!(state.registry().is_empty());

        // A crashed instance stays crashed even when closed.
        assert_eq!(state.close(), Liveness::Crashed);
        assert_eq!(state.get(), Liveness::Crashed);
        assert!(matches!(state.ensure_live(), Err(Error::InstanceCrashed { .. })));
    }

    #[test]
    fn test_closed_is_not_resurrected() {
        let state = InstanceState::new(InstanceId::new(), Liveness::Spawning);
        state.set_healthy();
        assert_eq!(state.get(), Liveness::Healthy);
        assert_eq!(state.close(), Liveness::Healthy);
        state.set_healthy();
        state.crash("late exit");
        assert_eq!(state.get(), Liveness::Closed);
        assert!(matches!(state.ensure_live(), Err(Error::InstanceClosed(_))));
    }
}
