//! Engine library setup is shared by every direct pool in the process.
//!
//! Kept in its own test binary: the reference count is process-wide.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docgate::engine::{EngineFactory, LopdfEngine, LopdfEngineFactory};
use docgate::prelude::*;
use docgate::protocol::{EngineError, InstanceId};
use docgate::{library_users, DirectPool};

#[derive(Clone, Default)]
struct CountingFactory {
    inits: Arc<AtomicUsize>,
    destroys: Arc<AtomicUsize>,
    inner: LopdfEngineFactory,
}

impl EngineFactory for CountingFactory {
    type Engine = LopdfEngine;

    fn create(&self, instance: InstanceId) -> std::result::Result<LopdfEngine, EngineError> {
        self.inner.create(instance)
    }

    fn init_library(&self) {
        self.inits.fetch_add(1, Ordering::SeqCst);
    }

    fn destroy_library(&self) {
        self.destroys.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_init_once_destroy_after_last_pool() {
    let factory = CountingFactory::default();

    let first = DirectPool::new(PoolConfig::direct(), factory.clone()).unwrap();
    let second = create_pool_with_factory(PoolConfig::direct(), factory.clone())
        .await
        .unwrap();
    assert_eq!(library_users(), 2);
    assert_eq!(factory.inits.load(Ordering::SeqCst), 1);

    first.close().await.unwrap();
    assert_eq!(library_users(), 1);
    assert_eq!(factory.destroys.load(Ordering::SeqCst), 0);

    // Still usable while another pool holds the library.
    let instance = second.get_instance(Duration::from_secs(5)).await.unwrap();
    instance.close().await.unwrap();

    second.close().await.unwrap();
    assert_eq!(library_users(), 0);
    assert_eq!(factory.destroys.load(Ordering::SeqCst), 1);

    // Closing again, or dropping, does not release twice.
    second.close().await.unwrap();
    drop(first);
    drop(second);
    assert_eq!(factory.destroys.load(Ordering::SeqCst), 1);

    // A new pool starts the cycle over.
    let third = DirectPool::new(PoolConfig::direct(), factory.clone()).unwrap();
    assert_eq!(factory.inits.load(Ordering::SeqCst), 2);
    drop(third);
    assert_eq!(library_users(), 0);
    assert_eq!(factory.destroys.load(Ordering::SeqCst), 2);
}
