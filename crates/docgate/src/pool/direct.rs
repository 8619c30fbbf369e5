// Single-instance pool
// Decision: The whole process shares one engine; acquiring an instance is acquiring a fair lock
// Decision: Library init/destroy is reference counted across every direct pool in the process
// Decision: A crashed engine is rebuilt from the factory on the next acquisition

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docgate_engine::EngineFactory;
use docgate_protocol::InstanceId;
use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn};

use super::{Lease, Pool, PoolStats, PoolStatus};
use crate::config::{PoolConfig, PoolMode};
use crate::context::{DirectContext, ExecutionContext, Liveness};
use crate::error::{Error, Result};
use crate::instance::Instance;

/// Direct pools currently holding the engine library.
static LIBRARY_USERS: Mutex<usize> = parking_lot::const_mutex(0);

/// Number of open direct pools sharing the engine library.
pub fn library_users() -> usize {
    *LIBRARY_USERS.lock()
}

fn attach_library<F: EngineFactory>(factory: &F) {
    let mut users = LIBRARY_USERS.lock();
    if *users == 0 {
        debug!("Initializing engine library");
        factory.init_library();
    }
    *users += 1;
}

fn detach_library<F: EngineFactory>(factory: &F) {
    let mut users = LIBRARY_USERS.lock();
    *users = users.saturating_sub(1);
    if *users == 0 {
        debug!("Destroying engine library");
        factory.destroy_library();
    }
}

#[derive(Debug, Default)]
struct Counters {
    checked_out: AtomicUsize,
    spawned: AtomicUsize,
    crashed: AtomicUsize,
}

struct DirectLease {
    _guard: OwnedMutexGuard<()>,
    counters: Arc<Counters>,
}

impl Lease for DirectLease {}

impl Drop for DirectLease {
    fn drop(&mut self) {
        self.counters.checked_out.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct DirectPool<F: EngineFactory> {
    config: PoolConfig,
    factory: Arc<F>,
    gate: Arc<tokio::sync::Mutex<()>>,
    context: Mutex<Arc<DirectContext<F::Engine>>>,
    status: Mutex<PoolStatus>,
    attached: AtomicBool,
    counters: Arc<Counters>,
}

impl<F: EngineFactory> DirectPool<F> {
    pub fn new(config: PoolConfig, factory: F) -> Result<Self> {
        if config.mode != PoolMode::Direct {
            return Err(Error::Config(format!(
                "direct pool given a {} configuration",
                config.mode
            )));
        }
        config.validate()?;

        attach_library(&factory);
        let context = match build_context(&factory) {
            Ok(context) => context,
            Err(e) => {
                detach_library(&factory);
                return Err(e);
            }
        };
        info!(instance_id = %context.id(), "Direct pool ready");

        let counters = Arc::new(Counters::default());
        counters.spawned.fetch_add(1, Ordering::Relaxed);

        Ok(Self {
            config,
            factory: Arc::new(factory),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            context: Mutex::new(Arc::new(context)),
            status: Mutex::new(PoolStatus::Running),
            attached: AtomicBool::new(true),
            counters,
        })
    }

    fn ensure_running(&self) -> Result<()> {
        match *self.status.lock() {
            PoolStatus::Running => Ok(()),
            PoolStatus::Draining | PoolStatus::Stopped => Err(Error::PoolClosed),
        }
    }

    /// The current context, rebuilt first if the previous one crashed.
    fn current_context(&self) -> Result<Arc<DirectContext<F::Engine>>> {
        let mut current = self.context.lock();
        if current.liveness() == Liveness::Crashed {
            let replacement = build_context(&*self.factory)?;
            warn!(
                crashed = %current.id(),
                replacement = %replacement.id(),
                "Replacing crashed direct instance"
            );
            self.counters.crashed.fetch_add(1, Ordering::Relaxed);
            self.counters.spawned.fetch_add(1, Ordering::Relaxed);
            *current = Arc::new(replacement);
        }
        Ok(current.clone())
    }

    fn detach(&self) {
        if self.attached.swap(false, Ordering::SeqCst) {
            detach_library(&*self.factory);
        }
    }
}

fn build_context<F: EngineFactory>(factory: &F) -> Result<DirectContext<F::Engine>> {
    let id = InstanceId::new();
    let engine = factory.create(id).map_err(|source| Error::Engine {
        operation: "CreateEngine",
        source,
    })?;
    Ok(DirectContext::new(id, engine))
}

#[async_trait]
impl<F: EngineFactory> Pool for DirectPool<F> {
    fn mode(&self) -> PoolMode {
        PoolMode::Direct
    }

    #[instrument(skip(self))]
    async fn get_instance(&self, timeout: Duration) -> Result<Instance> {
        self.ensure_running()?;
        let guard = tokio::time::timeout(timeout, self.gate.clone().lock_owned())
            .await
            .map_err(|_| Error::AcquireTimeout { waited: timeout })?;
        // Closed while we were queued.
        self.ensure_running()?;

        let context = self.current_context()?;
        self.counters.checked_out.fetch_add(1, Ordering::SeqCst);
        let lease = DirectLease {
            _guard: guard,
            counters: self.counters.clone(),
        };
        debug!(instance_id = %context.id(), "Direct instance checked out");
        Ok(Instance::new(context, Box::new(lease)))
    }

    #[instrument(skip(self))]
    async fn close(&self) -> Result<()> {
        {
            let mut status = self.status.lock();
            if *status != PoolStatus::Running {
                return Ok(());
            }
            *status = PoolStatus::Draining;
        }
        info!("Closing direct pool");

        let grace = self.config.shutdown_grace;
        let mut result = Ok(());
        let drained = tokio::time::timeout(grace, self.gate.clone().lock_owned()).await;
        if drained.is_err() {
            warn!(grace = ?grace, "Instance still checked out, closing it anyway");
            result = Err(Error::ShutdownTimeout(grace));
        }

        let context = self.context.lock().clone();
        match tokio::time::timeout(grace, context.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Direct instance did not close cleanly");
                result = result.and(Err(e));
            }
            Err(_) => {
                warn!("Engine call still running, abandoning it");
                result = result.and(Err(Error::ShutdownTimeout(grace)));
            }
        }

        self.detach();
        *self.status.lock() = PoolStatus::Stopped;
        info!("Direct pool closed");
        result
    }

    fn status(&self) -> PoolStatus {
        *self.status.lock()
    }

    fn stats(&self) -> PoolStats {
        let status = self.status();
        let live = usize::from(status != PoolStatus::Stopped);
        let checked_out = self.counters.checked_out.load(Ordering::SeqCst);
        PoolStats {
            mode: PoolMode::Direct,
            status,
            live,
            idle: live.saturating_sub(checked_out),
            checked_out,
            spawned: self.counters.spawned.load(Ordering::Relaxed),
            crashed: self.counters.crashed.load(Ordering::Relaxed),
            max_instances: 1,
        }
    }
}

impl<F: EngineFactory> Drop for DirectPool<F> {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgate_engine::LopdfEngineFactory;

    #[tokio::test]
    async fn test_rejects_isolated_config() {
        let result = DirectPool::new(PoolConfig::isolated(2), LopdfEngineFactory::new());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_zero_timeout_while_held() {
        let pool = DirectPool::new(PoolConfig::direct(), LopdfEngineFactory::new()).unwrap();
        let held = pool.get_instance(Duration::ZERO).await.unwrap();
        assert_eq!(pool.stats().checked_out, 1);

        let err = pool.get_instance(Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, Error::AcquireTimeout { .. }));

        drop(held);
        let again = pool.get_instance(Duration::ZERO).await.unwrap();
        assert_eq!(pool.stats().checked_out, 1);
        drop(again);
        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let pool = DirectPool::new(PoolConfig::direct(), LopdfEngineFactory::new()).unwrap();
        pool.close().await.unwrap();
        pool.close().await.unwrap();
        assert_eq!(pool.status(), PoolStatus::Stopped);
        assert_eq!(pool.stats().live, 0);
        assert!(matches!(
            pool.get_instance(Duration::from_millis(10)).await,
            Err(Error::PoolClosed)
        ));
    }
}
