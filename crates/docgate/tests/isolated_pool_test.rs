//! Integration tests for the worker-process pool
//!
//! Run with: cargo test -p docgate --test isolated_pool_test
//!
//! Workers are the `docgate-worker` binary built alongside these tests,
//! started with fault injection so marker documents can crash or stall them.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::Mutex;

use docgate::engine::fixtures::{crash_document, stall_document, SampleDocument};
use docgate::prelude::*;
use docgate::protocol::requests::{CloseDocument, GetPageCount, GetPageText};
use docgate::protocol::{ErrorCode, PageSelector};
use docgate::Liveness;

const ACQUIRE: Duration = Duration::from_secs(30);

fn worker() -> WorkerCommand {
    WorkerCommand::new(env!("CARGO_BIN_EXE_docgate-worker")).with_arg("--fault-injection")
}

fn isolated_config(max_instances: usize) -> PoolConfig {
    PoolConfig::isolated(max_instances)
        .with_worker(worker())
        .with_spawn_timeout(Duration::from_secs(20))
        .with_shutdown_grace(Duration::from_secs(5))
}

async fn isolated_pool(max_instances: usize) -> Arc<dyn Pool> {
    create_pool(isolated_config(max_instances)).await.unwrap()
}

fn sample(pages: u32) -> Vec<u8> {
    SampleDocument::new(pages).build().unwrap()
}

#[tokio::test]
async fn test_open_and_read_through_worker() {
    let pool = isolated_pool(2).await;
    assert_eq!(pool.mode(), PoolMode::Isolated);
    assert_eq!(pool.stats().idle, 1);

    let instance = pool.get_instance(ACQUIRE).await.unwrap();
    assert_eq!(instance.mode(), PoolMode::Isolated);
    let document = instance.new_document_from_bytes(sample(3), []).await.unwrap();
    assert_eq!(document.instance(), instance.id());

    let count = instance.call(GetPageCount { document }).await.unwrap();
    assert_eq!(count.page_count, 3);
    let text = instance
        .call(GetPageText {
            page: PageSelector::by_index(document, 2),
        })
        .await
        .unwrap();
    assert!(text.text.contains("Page 3"), "got {:?}", text.text);

    let err = instance
        .new_document_from_bytes(b"not a pdf at all".to_vec(), [])
        .await
        .unwrap_err();
    assert_eq!(err.engine_code(), Some(ErrorCode::Format));
    assert_eq!(instance.liveness(), Liveness::Healthy);

    instance.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_encrypted_document_password_crosses_the_wire() {
    let pool = isolated_pool(1).await;
    let instance = pool.get_instance(ACQUIRE).await.unwrap();
    let bytes = SampleDocument::new(3).encrypted("hunter2").build().unwrap();

    let err = instance.new_document_from_bytes(bytes.clone(), []).await.unwrap_err();
    assert_eq!(err.engine_code(), Some(ErrorCode::Password), "got {err}");
    let err = instance
        .new_document_from_bytes(bytes.clone(), [password("hunter3")])
        .await
        .unwrap_err();
    assert_eq!(err.engine_code(), Some(ErrorCode::Password), "got {err}");
    assert_eq!(instance.liveness(), Liveness::Healthy);
    assert!(instance.documents().is_empty());

    let document = instance
        .new_document_from_bytes(bytes, [password("hunter2")])
        .await
        .unwrap();
    let count = instance.call(GetPageCount { document }).await.unwrap();
    assert_eq!(count.page_count, 3);

    instance.close().await.unwrap();
    pool.close().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_crash_fails_only_the_current_call() {
    let pool = isolated_pool(2).await;
    let survivor = pool.get_instance(ACQUIRE).await.unwrap();
    let victim = pool.get_instance(ACQUIRE).await.unwrap();
    assert_ne!(survivor.id(), victim.id());

    let kept = survivor.new_document_from_bytes(sample(2), []).await.unwrap();

    let doomed = victim.new_document_from_bytes(sample(1), []).await.unwrap();
    let err = victim
        .new_document_from_bytes(crash_document().unwrap(), [])
        .await
        .unwrap_err();
    match &err {
        Error::InstanceCrashed { instance, .. } => assert_eq!(*instance, victim.id()),
        other => panic!("expected a crash, got {:?}", other),
    }
    assert!(err.is_retryable());
    assert_eq!(victim.liveness(), Liveness::Crashed);

    // Everything the crashed instance issued is dead; the instance stays crashed.
    let err = victim.call(GetPageCount { document: doomed }).await.unwrap_err();
    assert!(matches!(err, Error::InstanceCrashed { .. }));

    // The other worker never noticed.
    let count = survivor.call(GetPageCount { document: kept }).await.unwrap();
    assert_eq!(count.page_count, 2);

    let crashed_id = victim.id();
    victim.close().await.unwrap();
    assert_eq!(pool.stats().crashed, 1);

    let replacement = pool.get_instance(ACQUIRE).await.unwrap();
    assert_ne!(replacement.id(), crashed_id);
    assert_eq!(replacement.liveness(), Liveness::Healthy);
    assert!(replacement.documents().is_empty());

    // Handles of the crashed instance mean nothing to its replacement.
    let err = replacement
        .call(GetPageCount { document: doomed })
        .await
        .unwrap_err();
    match err {
        Error::InvalidHandle {
            fault: HandleFault::ForeignInstance { presented_to },
            ..
        } => assert_eq!(presented_to, replacement.id()),
        other => panic!("expected a foreign handle, got {:?}", other),
    }

    let document = replacement.new_document_from_bytes(sample(1), []).await.unwrap();
    replacement.call(GetPageCount { document }).await.unwrap();

    replacement.close().await.unwrap();
    survivor.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_crashed_instance_dropped_off_runtime() {
    let pool = isolated_pool(1).await;
    let instance = pool.get_instance(ACQUIRE).await.unwrap();
    let err = instance
        .new_document_from_bytes(crash_document().unwrap(), [])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InstanceCrashed { .. }), "got {:?}", err);

    let dropped = std::thread::spawn(move || drop(instance)).join();
    assert!(dropped.is_ok());
    assert_eq!(pool.stats().crashed, 1);
    assert_eq!(pool.stats().checked_out, 0);

    // The slot is usable again.
    let instance = pool.get_instance(ACQUIRE).await.unwrap();
    let document = instance.new_document_from_bytes(sample(1), []).await.unwrap();
    instance.call(GetPageCount { document }).await.unwrap();
    instance.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_stalled_call_is_killed_by_watchdog() {
    let config = isolated_config(1).with_invoke_watchdog(Duration::from_millis(500));
    let pool = create_pool(config).await.unwrap();
    let instance = pool.get_instance(ACQUIRE).await.unwrap();

    let started = Instant::now();
    let err = instance
        .new_document_from_bytes(stall_document().unwrap(), [])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InstanceCrashed { .. }), "got {:?}", err);
    assert!(started.elapsed() < Duration::from_secs(10));
    instance.close().await.unwrap();

    // The slot comes back with a fresh worker.
    let instance = pool.get_instance(ACQUIRE).await.unwrap();
    let document = instance.new_document_from_bytes(sample(1), []).await.unwrap();
    instance.call(GetPageCount { document }).await.unwrap();
    instance.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_checkouts_bounded_by_max_instances() {
    let pool = isolated_pool(2).await;
    let first = pool.get_instance(ACQUIRE).await.unwrap();
    let second = pool.get_instance(ACQUIRE).await.unwrap();
    assert_eq!(pool.stats().checked_out, 2);

    let err = pool
        .get_instance(Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AcquireTimeout { .. }), "got {:?}", err);
    let err = pool.get_instance(Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, Error::AcquireTimeout { .. }));

    let released = first.id();
    first.close().await.unwrap();
    let third = pool.get_instance(ACQUIRE).await.unwrap();
    assert_eq!(third.id(), released);
    assert!(pool.stats().live <= 2);

    third.close().await.unwrap();
    second.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_never_exceed_max_instances() {
    const CALLERS: usize = 8;
    let pool = isolated_pool(2).await;
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let peak_live = Arc::new(AtomicUsize::new(0));

    let callers = (0..CALLERS).map(|n| {
        let pool = pool.clone();
        let active = active.clone();
        let peak = peak.clone();
        let peak_live = peak_live.clone();
        tokio::spawn(async move {
            let instance = pool.get_instance(ACQUIRE).await.unwrap();
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            peak_live.fetch_max(pool.stats().live, Ordering::SeqCst);

            let document = instance
                .new_document_from_bytes(sample(1 + n as u32 % 3), [])
                .await
                .unwrap();
            let count = instance.call(GetPageCount { document }).await.unwrap();
            assert_eq!(count.page_count, 1 + n as u32 % 3);
            tokio::time::sleep(Duration::from_millis(20)).await;
            instance.call(CloseDocument { document }).await.unwrap();

            active.fetch_sub(1, Ordering::SeqCst);
            instance.close().await.unwrap();
        })
    });
    for joined in join_all(callers).await {
        joined.unwrap();
    }

    assert_eq!(active.load(Ordering::SeqCst), 0);
    let peak = peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrent checkouts {peak}");
    assert!(peak_live.load(Ordering::SeqCst) <= 2);
    let stats = pool.stats();
    assert!(stats.live <= 2, "{stats:?}");
    assert_eq!(stats.checked_out, 0);
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_waiters_are_served_in_arrival_order() {
    let pool = isolated_pool(2).await;
    let first = pool.get_instance(ACQUIRE).await.unwrap();
    let second = pool.get_instance(ACQUIRE).await.unwrap();
    let served = Arc::new(Mutex::new(Vec::new()));

    let impatient = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get_instance(Duration::from_millis(300)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let waiter = |name: &'static str| {
        let pool = pool.clone();
        let served = served.clone();
        tokio::spawn(async move {
            let instance = pool.get_instance(ACQUIRE).await.unwrap();
            served.lock().push(name);
            tokio::time::sleep(Duration::from_millis(100)).await;
            instance.close().await.unwrap();
        })
    };
    let b = waiter("b");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let c = waiter("c");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = impatient.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::AcquireTimeout { .. }), "got {:?}", err);
    assert!(served.lock().is_empty());

    // One slot frees up; `c` can only run after `b` hands it back.
    first.close().await.unwrap();
    b.await.unwrap();
    c.await.unwrap();
    assert_eq!(*served.lock(), vec!["b", "c"]);

    second.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_same_bytes_on_two_instances_are_independent() {
    let pool = isolated_pool(2).await;
    let a = pool.get_instance(ACQUIRE).await.unwrap();
    let b = pool.get_instance(ACQUIRE).await.unwrap();
    let bytes = sample(2);

    let on_a = a.new_document_from_bytes(bytes.clone(), []).await.unwrap();
    let on_b = b.new_document_from_bytes(bytes, []).await.unwrap();
    assert_ne!(on_a.instance(), on_b.instance());

    a.call(CloseDocument { document: on_a }).await.unwrap();
    let count = b.call(GetPageCount { document: on_b }).await.unwrap();
    assert_eq!(count.page_count, 2);

    // A's handle is foreign to B.
    let err = b.call(GetPageCount { document: on_a }).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidHandle {
            fault: HandleFault::ForeignInstance { .. },
            ..
        }
    ));

    a.close().await.unwrap();
    b.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_reader_is_buffered_for_workers() {
    let pool = isolated_pool(1).await;
    let instance = pool.get_instance(ACQUIRE).await.unwrap();

    let mut bytes = sample(2);
    let size = bytes.len() as u64;
    bytes.extend_from_slice(b"bytes past the declared size");
    let document = instance
        .new_document_from_reader(Cursor::new(bytes), size, [])
        .await
        .unwrap();
    let count = instance.call(GetPageCount { document }).await.unwrap();
    assert_eq!(count.page_count, 2);

    instance.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_callbacks_need_direct_mode() {
    let pool = isolated_pool(1).await;
    let instance = pool.get_instance(ACQUIRE).await.unwrap();

    let err = instance
        .set_time_function(Some(Arc::new(|| 0)))
        .await
        .unwrap_err();
    match err {
        Error::ModeUnsupported { operation, mode } => {
            assert_eq!(operation, "SetTimeFunction");
            assert_eq!(mode, PoolMode::Isolated);
        }
        other => panic!("expected ModeUnsupported, got {:?}", other),
    }
    let err = instance.set_unsupported_object_handler(None).await.unwrap_err();
    assert!(matches!(err, Error::ModeUnsupported { .. }));

    // The instance is still fine.
    assert_eq!(instance.liveness(), Liveness::Healthy);
    instance.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_file_path_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.pdf");
    std::fs::write(&path, sample(5)).unwrap();

    let pool = isolated_pool(1).await;
    let instance = pool.get_instance(ACQUIRE).await.unwrap();
    let document = instance
        .new_document_from_file_path(&path, [])
        .await
        .unwrap();
    let count = instance.call(GetPageCount { document }).await.unwrap();
    assert_eq!(count.page_count, 5);

    instance.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent_and_final() {
    let pool = isolated_pool(2).await;
    let instance = pool.get_instance(ACQUIRE).await.unwrap();
    instance.new_document_from_bytes(sample(1), []).await.unwrap();
    instance.close().await.unwrap();

    pool.close().await.unwrap();
    pool.close().await.unwrap();
    assert_eq!(pool.status(), PoolStatus::Stopped);
    assert_eq!(pool.stats().idle, 0);

    let err = pool.get_instance(ACQUIRE).await.unwrap_err();
    assert!(matches!(err, Error::PoolClosed));
}

#[tokio::test]
async fn test_shutdown_reports_holders_past_grace() {
    let config = isolated_config(1).with_shutdown_grace(Duration::from_millis(200));
    let pool = create_pool(config).await.unwrap();
    let instance = pool.get_instance(ACQUIRE).await.unwrap();

    let err = pool.close().await.unwrap_err();
    assert!(matches!(err, Error::ShutdownTimeout(_)), "got {:?}", err);
    assert_eq!(instance.liveness(), Liveness::Closed);

    let err = instance
        .new_document_from_bytes(sample(1), [])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InstanceClosed(_)));
    instance.close().await.unwrap();
}

#[tokio::test]
async fn test_worker_path_must_exist() {
    let config = isolated_config(1)
        .with_worker(WorkerCommand::new("/nonexistent/docgate-worker"));
    let err = create_pool(config).await.err().expect("expected create_pool to fail");
    assert!(matches!(err, Error::Spawn(_)), "got {:?}", err);
}
