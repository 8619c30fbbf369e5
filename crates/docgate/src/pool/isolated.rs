// Multi-process pool
// Decision: A fair semaphore sized to max_instances bounds checkouts; waiters are served FIFO
// Decision: Idle workers are probed before hand-out; a dead one is discarded and the next tried
// Decision: Spawning runs in a tracked task that owns the permit, so a caller giving up mid-spawn
//           leaves a parked worker behind instead of a leaked one
// Decision: Crashed or surplus workers are closed in the background and the idle set is
//           replenished to min_idle

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docgate_protocol::InstanceId;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use super::{Lease, Pool, PoolStats, PoolStatus};
use crate::config::{PoolConfig, PoolMode};
use crate::context::{ExecutionContext, IsolatedContext, Liveness};
use crate::error::{Error, Result};
use crate::instance::Instance;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Default)]
struct Workers {
    idle: VecDeque<Arc<IsolatedContext>>,
    checked_out: HashMap<InstanceId, Arc<IsolatedContext>>,
    /// Workers alive or being started.
    live: usize,
}

struct Shared {
    config: PoolConfig,
    permits: Arc<Semaphore>,
    workers: Mutex<Workers>,
    status: Mutex<PoolStatus>,
    tracker: TaskTracker,
    /// Runtime the pool started on. Leases may be dropped from any thread.
    runtime: Handle,
    spawned: AtomicUsize,
    crashed: AtomicUsize,
}

impl Shared {
    fn is_running(&self) -> bool {
        *self.status.lock() == PoolStatus::Running
    }

    /// Claims a slot for a new worker unless the pool is at capacity.
    fn reserve(&self) -> bool {
        let mut workers = self.workers.lock();
        if workers.live < self.config.max_instances {
            workers.live += 1;
            true
        } else {
            false
        }
    }

    /// Starts a worker into a slot claimed by `reserve`.
    async fn spawn_reserved(&self) -> Result<Arc<IsolatedContext>> {
        match IsolatedContext::spawn(&self.config).await {
            Ok(context) => {
                self.spawned.fetch_add(1, Ordering::Relaxed);
                Ok(Arc::new(context))
            }
            Err(e) => {
                let mut workers = self.workers.lock();
                workers.live = workers.live.saturating_sub(1);
                Err(e)
            }
        }
    }

    /// Takes back a worker: idle again if healthy and wanted, otherwise closed.
    fn park(self: &Arc<Self>, context: Arc<IsolatedContext>) {
        let healthy = context.liveness() == Liveness::Healthy;
        let mut workers = self.workers.lock();
        workers.checked_out.remove(&context.id());
        if healthy && self.is_running() && workers.idle.len() < self.config.max_idle {
            workers.idle.push_back(context);
            return;
        }
        drop(workers);
        self.discard(context);
    }

    fn discard(self: &Arc<Self>, context: Arc<IsolatedContext>) {
        {
            let mut workers = self.workers.lock();
            workers.live = workers.live.saturating_sub(1);
        }
        if context.liveness() == Liveness::Crashed {
            self.crashed.fetch_add(1, Ordering::Relaxed);
        }
        debug!(instance_id = %context.id(), liveness = %context.liveness(), "Discarding worker");
        let closing = async move {
            if let Err(e) = context.close().await {
                debug!(instance_id = %context.id(), error = %e, "Worker close failed");
            }
        };
        self.tracker.spawn_on(closing, &self.runtime);
        self.replenish();
    }

    fn replenish(self: &Arc<Self>) {
        if !self.is_running() {
            return;
        }
        let shared = self.clone();
        self.tracker
            .spawn_on(async move { shared.fill_idle().await }, &self.runtime);
    }

    /// Spawns workers until `min_idle` are idle, without ever taking a
    /// permit a caller is waiting for.
    async fn fill_idle(self: Arc<Self>) {
        while self.is_running() {
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                break;
            };
            {
                let mut workers = self.workers.lock();
                if workers.idle.len() >= self.config.min_idle
                    || workers.live >= self.config.max_instances
                {
                    break;
                }
                workers.live += 1;
            }
            match self.spawn_reserved().await {
                Ok(context) => self.park(context),
                Err(e) => {
                    warn!(error = %e, "Failed to replenish idle workers");
                    break;
                }
            }
            drop(permit);
        }
    }
}

/// Keeps a worker registered as checked out; parks it again on drop.
struct Checkout {
    context: Arc<IsolatedContext>,
    shared: Arc<Shared>,
}

impl Checkout {
    fn new(context: Arc<IsolatedContext>, shared: Arc<Shared>) -> Self {
        shared
            .workers
            .lock()
            .checked_out
            .insert(context.id(), context.clone());
        Self { context, shared }
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        self.shared.park(self.context.clone());
    }
}

struct IsolatedLease {
    // Field order matters: the worker is parked before the permit frees up.
    _checkout: Checkout,
    _permit: OwnedSemaphorePermit,
}

impl Lease for IsolatedLease {}

pub struct IsolatedPool {
    shared: Arc<Shared>,
}

impl IsolatedPool {
    /// Validates `config` and starts `min_idle` workers.
    #[instrument(skip(config), fields(max_instances = config.max_instances, min_idle = config.min_idle))]
    pub async fn start(config: PoolConfig) -> Result<Self> {
        if config.mode != PoolMode::Isolated {
            return Err(Error::Config(format!(
                "isolated pool given a {} configuration",
                config.mode
            )));
        }
        config.validate()?;

        let shared = Arc::new(Shared {
            permits: Arc::new(Semaphore::new(config.max_instances)),
            workers: Mutex::new(Workers::default()),
            status: Mutex::new(PoolStatus::Running),
            tracker: TaskTracker::new(),
            runtime: Handle::current(),
            spawned: AtomicUsize::new(0),
            crashed: AtomicUsize::new(0),
            config,
        });

        for _ in 0..shared.config.min_idle {
            if !shared.reserve() {
                break;
            }
        }
        let reserved = shared.workers.lock().live;
        let warm = futures::future::join_all((0..reserved).map(|_| shared.spawn_reserved())).await;
        let pool = Self { shared };
        for outcome in warm {
            match outcome {
                Ok(context) => pool.shared.park(context),
                Err(e) => {
                    pool.close().await.ok();
                    return Err(e);
                }
            }
        }

        info!(idle = pool.shared.workers.lock().idle.len(), "Isolated pool ready");
        Ok(pool)
    }

    /// Starts a worker for a caller holding `permit`. Gives up at `deadline`;
    /// a worker finished after that is parked for the next caller.
    async fn spawn_for_caller(
        &self,
        permit: OwnedSemaphorePermit,
        deadline: Instant,
        waited: Duration,
    ) -> Result<(Arc<IsolatedContext>, OwnedSemaphorePermit)> {
        if !self.shared.reserve() {
            return Err(Error::Spawn(format!(
                "all {} worker slots are taken",
                self.shared.config.max_instances
            )));
        }

        let (tx, rx) = oneshot::channel();
        let shared = self.shared.clone();
        self.shared.tracker.spawn(async move {
            match shared.spawn_reserved().await {
                Ok(context) => {
                    if let Err(Ok((context, permit))) = tx.send(Ok((context, permit))) {
                        debug!(instance_id = %context.id(), "Caller gave up, parking new worker");
                        shared.park(context);
                        drop(permit);
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e));
                }
            }
        });

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(spawned)) => spawned,
            Ok(Err(_)) => Err(Error::Spawn("spawn task ended without a result".into())),
            Err(_) => Err(Error::AcquireTimeout { waited }),
        }
    }
}

#[async_trait]
impl Pool for IsolatedPool {
    fn mode(&self) -> PoolMode {
        PoolMode::Isolated
    }

    #[instrument(skip(self))]
    async fn get_instance(&self, timeout: Duration) -> Result<Instance> {
        if !self.shared.is_running() {
            return Err(Error::PoolClosed);
        }
        let deadline = Instant::now() + timeout;
        let permit = match tokio::time::timeout_at(deadline, self.shared.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::PoolClosed),
            Err(_) => return Err(Error::AcquireTimeout { waited: timeout }),
        };

        loop {
            let candidate = self.shared.workers.lock().idle.pop_front();
            let Some(context) = candidate else {
                let (context, permit) = self.spawn_for_caller(permit, deadline, timeout).await?;
                let checkout = Checkout::new(context.clone(), self.shared.clone());
                debug!(instance_id = %context.id(), "Fresh worker checked out");
                return Ok(Instance::new(
                    context,
                    Box::new(IsolatedLease {
                        _checkout: checkout,
                        _permit: permit,
                    }),
                ));
            };

            let checkout = Checkout::new(context.clone(), self.shared.clone());
            if self.shared.config.health_check {
                if let Err(e) = context.check_health().await {
                    warn!(instance_id = %context.id(), error = %e, "Idle worker failed health check");
                    drop(checkout);
                    continue;
                }
            } else if context.liveness() != Liveness::Healthy {
                drop(checkout);
                continue;
            }

            debug!(instance_id = %context.id(), "Idle worker checked out");
            return Ok(Instance::new(
                context,
                Box::new(IsolatedLease {
                    _checkout: checkout,
                    _permit: permit,
                }),
            ));
        }
    }

    #[instrument(skip(self))]
    async fn close(&self) -> Result<()> {
        {
            let mut status = self.shared.status.lock();
            if *status != PoolStatus::Running {
                return Ok(());
            }
            *status = PoolStatus::Draining;
        }
        self.shared.permits.close();
        info!("Closing isolated pool");

        let grace = self.shared.config.shutdown_grace;
        let deadline = Instant::now() + grace;
        let mut result = Ok(());
        loop {
            let outstanding = self.shared.workers.lock().checked_out.len();
            if outstanding == 0 {
                break;
            }
            if Instant::now() >= deadline {
                warn!(outstanding, grace = ?grace, "Workers still checked out, closing them anyway");
                result = Err(Error::ShutdownTimeout(grace));
                break;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        let (idle, busy) = {
            let mut workers = self.shared.workers.lock();
            let idle: Vec<_> = workers.idle.drain(..).collect();
            workers.live = workers.live.saturating_sub(idle.len());
            let busy: Vec<_> = workers.checked_out.values().cloned().collect();
            (idle, busy)
        };
        let closing = idle.iter().chain(busy.iter()).map(|context| context.close());
        for outcome in futures::future::join_all(closing).await {
            if let Err(e) = outcome {
                warn!(error = %e, "Worker did not close cleanly");
                result = result.and(Err(e));
            }
        }

        *self.shared.status.lock() = PoolStatus::Stopped;
        self.shared.tracker.close();
        if tokio::time::timeout(grace, self.shared.tracker.wait()).await.is_err() {
            warn!("Background pool tasks still running after shutdown");
        }
        info!("Isolated pool closed");
        result
    }

    fn status(&self) -> PoolStatus {
        *self.shared.status.lock()
    }

    fn stats(&self) -> PoolStats {
        let workers = self.shared.workers.lock();
        PoolStats {
            mode: PoolMode::Isolated,
            status: self.status(),
            live: workers.live,
            idle: workers.idle.len(),
            checked_out: workers.checked_out.len(),
            spawned: self.shared.spawned.load(Ordering::Relaxed),
            crashed: self.shared.crashed.load(Ordering::Relaxed),
            max_instances: self.shared.config.max_instances,
        }
    }
}

impl Drop for IsolatedPool {
    fn drop(&mut self) {
        let mut status = self.shared.status.lock();
        if *status == PoolStatus::Stopped {
            return;
        }
        *status = PoolStatus::Stopped;
        drop(status);
        self.shared.permits.close();
        // Dropping the last handle on a worker kills its process.
        let idle: Vec<_> = self.shared.workers.lock().idle.drain(..).collect();
        drop(idle);
    }
}
