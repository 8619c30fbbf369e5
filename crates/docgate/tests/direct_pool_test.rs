//! Integration tests for the in-process pool
//!
//! Run with: cargo test -p docgate --test direct_pool_test

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use docgate::prelude::*;
use docgate::protocol::requests::{
    CloseDocument, GetMetaText, GetPageCount, GetPageText, LoadPage, SaveAsCopy,
};
use docgate::engine::fixtures::SampleDocument;
use docgate::engine::{LopdfEngineFactory, UnsupportedFeature};
use docgate::protocol::{ErrorCode, PageSelector};
use docgate::{DirectPool, Liveness};

const ACQUIRE: Duration = Duration::from_secs(5);

fn direct_pool() -> Arc<dyn Pool> {
    Arc::new(DirectPool::new(PoolConfig::direct(), LopdfEngineFactory::new()).unwrap())
}

#[tokio::test]
async fn test_open_and_read_text() {
    let pool = direct_pool();
    let instance = pool.get_instance(ACQUIRE).await.unwrap();
    assert_eq!(instance.mode(), PoolMode::Direct);

    let bytes = SampleDocument::new(3).title("Quarterly").build().unwrap();
    let document = instance.new_document_from_bytes(bytes, []).await.unwrap();
    assert_eq!(document.instance(), instance.id());

    let count = instance.call(GetPageCount { document }).await.unwrap();
    assert_eq!(count.page_count, 3);

    let text = instance
        .call(GetPageText {
            page: PageSelector::by_index(document, 1),
        })
        .await
        .unwrap();
    assert!(text.text.contains("Page 2"), "got {:?}", text.text);

    let title = instance
        .call(GetMetaText {
            document,
            tag: "Title".into(),
        })
        .await
        .unwrap();
    assert_eq!(title.value, "Quarterly");

    instance.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_engine_failure_keeps_instance_usable() {
    let pool = direct_pool();
    let instance = pool.get_instance(ACQUIRE).await.unwrap();

    let err = instance
        .new_document_from_bytes(b"definitely not a pdf".to_vec(), [])
        .await
        .unwrap_err();
    assert_eq!(err.engine_code(), Some(ErrorCode::Format));
    assert!(!err.is_retryable());
    assert_eq!(instance.liveness(), Liveness::Healthy);

    let bytes = SampleDocument::new(1).build().unwrap();
    instance.new_document_from_bytes(bytes, []).await.unwrap();
    instance.close().await.unwrap();
    pool.close().await.unwrap();
}

#[test_log::test(tokio::test)]
async fn test_closing_document_invalidates_its_pages() {
    let pool = direct_pool();
    let instance = pool.get_instance(ACQUIRE).await.unwrap();
    let bytes = SampleDocument::new(2).build().unwrap();
    let document = instance.new_document_from_bytes(bytes, []).await.unwrap();

    let page = instance
        .call(LoadPage { document, index: 0 })
        .await
        .unwrap()
        .page;
    let text = instance
        .call(GetPageText { page: page.into() })
        .await
        .unwrap();
    assert!(text.text.contains("Page 1"));

    instance.call(CloseDocument { document }).await.unwrap();
    assert!(instance.documents().is_empty());

    let err = instance
        .call(GetPageText { page: page.into() })
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            Error::InvalidHandle {
                fault: HandleFault::Released,
                ..
            }
        ),
        "got {:?}",
        err
    );

    // A second close of the same document is refused before the engine sees it.
    let err = instance.close_document(document).await.unwrap_err();
    assert!(matches!(err, Error::InvalidHandle { .. }));

    instance.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_handles_do_not_cross_pools() {
    let first = direct_pool();
    let second = direct_pool();
    let a = first.get_instance(ACQUIRE).await.unwrap();
    let b = second.get_instance(ACQUIRE).await.unwrap();
    assert_ne!(a.id(), b.id());

    let document = a
        .new_document_from_bytes(SampleDocument::new(1).build().unwrap(), [])
        .await
        .unwrap();
    let err = b.call(GetPageCount { document }).await.unwrap_err();
    match err {
        Error::InvalidHandle {
            fault: HandleFault::ForeignInstance { presented_to },
            ..
        } => assert_eq!(presented_to, b.id()),
        other => panic!("expected foreign handle, got {:?}", other),
    }

    a.close().await.unwrap();
    b.close().await.unwrap();
    first.close().await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_release_closes_leftover_documents() {
    let pool = direct_pool();
    let instance = pool.get_instance(ACQUIRE).await.unwrap();
    let id = instance.id();
    let document = instance
        .new_document_from_bytes(SampleDocument::new(1).build().unwrap(), [])
        .await
        .unwrap();
    assert_eq!(instance.documents(), vec![document]);
    instance.close().await.unwrap();

    let instance = pool.get_instance(ACQUIRE).await.unwrap();
    assert_eq!(instance.id(), id);
    assert!(instance.documents().is_empty());
    let err = instance.call(GetPageCount { document }).await.unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidHandle {
            fault: HandleFault::Released,
            ..
        }
    ));
    instance.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_callbacks_stamp_modification_date() {
    let pool = direct_pool();
    let instance = pool.get_instance(ACQUIRE).await.unwrap();
    instance
        .set_time_function(Some(Arc::new(|| 1_700_000_000)))
        .await
        .unwrap();
    instance
        .set_localtime_function(Some(Arc::new(|seconds| {
            chrono::DateTime::from_timestamp(seconds, 0)
                .unwrap()
                .naive_utc()
        })))
        .await
        .unwrap();

    let document = instance
        .new_document_from_bytes(SampleDocument::new(1).build().unwrap(), [])
        .await
        .unwrap();
    let saved = instance
        .call(SaveAsCopy {
            document,
            file_version: None,
            path: None,
        })
        .await
        .unwrap();
    let copy = instance
        .new_document_from_bytes(saved.bytes.unwrap(), [])
        .await
        .unwrap();
    let stamp = instance
        .call(GetMetaText {
            document: copy,
            tag: "ModDate".into(),
        })
        .await
        .unwrap();
    assert_eq!(stamp.value, "D:20231114221320");

    instance.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_unsupported_object_handler_runs_in_process() {
    let pool = direct_pool();
    let instance = pool.get_instance(ACQUIRE).await.unwrap();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    instance
        .set_unsupported_object_handler(Some(Arc::new(move |feature: UnsupportedFeature| {
            assert_eq!(feature, UnsupportedFeature::Attachment);
            counter.fetch_add(1, Ordering::SeqCst);
        })))
        .await
        .unwrap();

    let bytes = SampleDocument::new(1).with_attachment().build().unwrap();
    instance.new_document_from_bytes(bytes, []).await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    instance.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_reader_is_read_in_place() {
    let pool = direct_pool();
    let instance = pool.get_instance(ACQUIRE).await.unwrap();

    let mut bytes = SampleDocument::new(2).build().unwrap();
    let size = bytes.len() as u64;
    bytes.extend_from_slice(b"trailing bytes past the declared size");
    let document = instance
        .new_document_from_reader(Cursor::new(bytes), size, [])
        .await
        .unwrap();
    let count = instance.call(GetPageCount { document }).await.unwrap();
    assert_eq!(count.page_count, 2);

    let err = instance
        .new_document_from_reader(Cursor::new(vec![0u8; 8]), 64, [])
        .await
        .unwrap_err();
    assert_eq!(err.engine_code(), Some(ErrorCode::File));

    instance.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_file_path_input() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.pdf");
    std::fs::write(&path, SampleDocument::new(4).build().unwrap()).unwrap();

    let pool = direct_pool();
    let instance = pool.get_instance(ACQUIRE).await.unwrap();
    let document = instance
        .new_document_from_file_path(&path, [])
        .await
        .unwrap();
    let count = instance.call(GetPageCount { document }).await.unwrap();
    assert_eq!(count.page_count, 4);

    let err = instance
        .new_document_from_file_path(dir.path().join("missing.pdf"), [])
        .await
        .unwrap_err();
    assert_eq!(err.engine_code(), Some(ErrorCode::File));

    instance.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_holders_are_serialized() {
    let pool = direct_pool();
    let bytes = SampleDocument::new(1).build().unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        let bytes = bytes.clone();
        let active = active.clone();
        let peak = peak.clone();
        tasks.push(tokio::spawn(async move {
            let instance = pool.get_instance(Duration::from_secs(30)).await.unwrap();
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            let document = instance.new_document_from_bytes(bytes, []).await.unwrap();
            instance.call(GetPageCount { document }).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            instance.close().await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats().checked_out, 0);
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_waiter_sees_pool_closed() {
    let pool = direct_pool();
    let holder = pool.get_instance(ACQUIRE).await.unwrap();

    let waiting = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get_instance(Duration::from_secs(30)).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let closing = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.close().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pool.status(), PoolStatus::Draining);
    drop(holder);

    closing.await.unwrap().unwrap();
    assert!(matches!(waiting.await.unwrap(), Err(Error::PoolClosed)));
    assert_eq!(pool.status(), PoolStatus::Stopped);

    // Second close is a no-op.
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_password_option_is_forwarded() {
    let pool = direct_pool();
    let instance = pool.get_instance(ACQUIRE).await.unwrap();
    let bytes = SampleDocument::new(1).build().unwrap();
    let request = OpenDocumentRequest::new(DocumentInput::Bytes(bytes)).with_password("unused");
    let document = instance.open_document(request).await.unwrap();
    assert_eq!(instance.documents(), vec![document]);
    instance.close().await.unwrap();
    pool.close().await.unwrap();
}

#[tokio::test]
async fn test_encrypted_document_requires_password() {
    let pool = direct_pool();
    let instance = pool.get_instance(ACQUIRE).await.unwrap();
    let bytes = SampleDocument::new(2).encrypted("hunter2").build().unwrap();

    let err = instance.new_document_from_bytes(bytes.clone(), []).await.unwrap_err();
    assert_eq!(err.engine_code(), Some(ErrorCode::Password), "got {err}");
    let err = instance
        .new_document_from_bytes(bytes.clone(), [password("hunter3")])
        .await
        .unwrap_err();
    assert_eq!(err.engine_code(), Some(ErrorCode::Password), "got {err}");
    assert!(instance.documents().is_empty());

    let request = OpenDocumentRequest::new(DocumentInput::Bytes(bytes)).with_password("hunter2");
    let document = instance.open_document(request).await.unwrap();
    let count = instance.call(GetPageCount { document }).await.unwrap();
    assert_eq!(count.page_count, 2);

    instance.close().await.unwrap();
    pool.close().await.unwrap();
}
