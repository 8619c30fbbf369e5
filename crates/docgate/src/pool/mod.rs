//! Instance pools.
//!
//! Two strategies share one contract:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Pool::get_instance(timeout)                                      │
//! │                                                                  │
//! │  DirectPool                        IsolatedPool                  │
//! │  ┌────────────────────────┐        ┌───────────────────────────┐ │
//! │  │ fair mutex             │        │ fair semaphore (max)      │ │
//! │  │   └─ one DirectContext │        │   ├─ idle deque           │ │
//! │  │      (whole process)   │        │   ├─ spawn on demand      │ │
//! │  └────────────────────────┘        │   └─ replenish to min_idle│ │
//! │                                    └───────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Waiters are served in arrival order. A waiter that times out or is
//! dropped simply leaves the queue. Dropping an [`Instance`] (or closing
//! it) hands it back; crashed instances are discarded and replaced.

mod direct;
mod isolated;

pub use direct::{library_users, DirectPool};
pub use isolated::IsolatedPool;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docgate_engine::{EngineFactory, LopdfEngineFactory};
use serde::Serialize;

use crate::config::{PoolConfig, PoolMode};
use crate::error::Result;
use crate::instance::Instance;

/// Pool lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStatus {
    /// Accepting acquisitions
    Running,
    /// Closing: no new acquisitions, waiting for holders
    Draining,
    /// Every instance torn down
    Stopped,
}

/// Point-in-time counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub mode: PoolMode,
    pub status: PoolStatus,
    /// Instances alive or being started.
    pub live: usize,
    pub idle: usize,
    pub checked_out: usize,
    /// Instances started over the pool's lifetime.
    pub spawned: usize,
    /// Instances discarded after a crash.
    pub crashed: usize,
    pub max_instances: usize,
}

#[async_trait]
pub trait Pool: Send + Sync {
    fn mode(&self) -> PoolMode;

    /// Waits up to `timeout` for exclusive use of an instance.
    async fn get_instance(&self, timeout: Duration) -> Result<Instance>;

    /// Stops new acquisitions, waits for holders up to the grace period and
    /// tears everything down. A second call is a no-op.
    async fn close(&self) -> Result<()>;

    fn status(&self) -> PoolStatus;

    fn stats(&self) -> PoolStats;
}

/// Holds an instance checked out. Dropping it hands the instance back.
pub(crate) trait Lease: Send + Sync {}

/// Creates a pool for `config`, with the bundled engine for direct mode.
pub async fn create_pool(config: PoolConfig) -> Result<Arc<dyn Pool>> {
    create_pool_with_factory(config, LopdfEngineFactory::new()).await
}

/// Creates a pool for `config`. `factory` builds the in-process engine in
/// direct mode; isolated workers build their own.
pub async fn create_pool_with_factory<F: EngineFactory>(
    config: PoolConfig,
    factory: F,
) -> Result<Arc<dyn Pool>> {
    match config.mode {
        PoolMode::Direct => Ok(Arc::new(DirectPool::new(config, factory)?)),
        PoolMode::Isolated => Ok(Arc::new(IsolatedPool::start(config).await?)),
    }
}
