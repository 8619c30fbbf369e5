// In-process execution context
// Decision: Engine calls run on the blocking pool; the engine never sees an async runtime
// Decision: A panicking engine call crashes the instance; its state is not trusted afterwards
// Decision: In-process engine calls are serialized process-wide, across every direct pool

use std::sync::Arc;

use async_trait::async_trait;
use docgate_engine::{Engine, LocalRequest, LocalResponse};
use docgate_protocol::{InstanceId, Request, Response};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{ExecutionContext, InstanceState, Liveness};
use crate::config::PoolMode;
use crate::error::{Error, Result};
use crate::registry::HandleRegistry;

/// Held for the duration of every in-process engine call.
static ENGINE_CALLS: Mutex<()> = parking_lot::const_mutex(());

pub struct DirectContext<E: Engine> {
    state: Arc<InstanceState>,
    // `None` once closed; dropping the engine releases everything it holds.
    engine: Arc<Mutex<Option<E>>>,
}

impl<E: Engine> DirectContext<E> {
    pub fn new(id: InstanceId, engine: E) -> Self {
        Self {
            state: Arc::new(InstanceState::new(id, Liveness::Healthy)),
            engine: Arc::new(Mutex::new(Some(engine))),
        }
    }

    /// Runs `f` against the engine on a blocking thread.
    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut E) -> T + Send + 'static,
    {
        self.state.ensure_live()?;
        let engine = self.engine.clone();
        let id = self.state.id();
        let joined = tokio::task::spawn_blocking(move || {
            let _serialized = ENGINE_CALLS.lock();
            let mut guard = engine.lock();
            guard.as_mut().map(f)
        })
        .await;

        match joined {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(Error::InstanceClosed(id)),
            Err(e) if e.is_panic() => {
                Err(self.state.crash(format!("engine panicked during {}", operation)))
            }
            Err(e) => Err(self.state.crash(format!("{} was cancelled: {}", operation, e))),
        }
    }
}

#[async_trait]
impl<E: Engine> ExecutionContext for DirectContext<E> {
    fn id(&self) -> InstanceId {
        self.state.id()
    }

    fn mode(&self) -> PoolMode {
        PoolMode::Direct
    }

    fn liveness(&self) -> Liveness {
        self.state.get()
    }

    fn registry(&self) -> &Arc<HandleRegistry> {
        self.state.registry()
    }

    async fn invoke(&self, request: Request) -> Result<Response> {
        let operation = request.operation().name();
        trace!(instance_id = %self.state.id(), operation, "Direct invoke");
        self.run(operation, move |engine| engine.execute(request))
            .await?
            .map_err(|source| Error::Engine { operation, source })
    }

    async fn invoke_local(&self, request: LocalRequest) -> Result<LocalResponse> {
        let operation = request.operation().name();
        trace!(instance_id = %self.state.id(), operation, "Direct local invoke");
        self.run(operation, move |engine| engine.execute_local(request))
            .await?
            .map_err(|source| Error::Engine { operation, source })
    }

    async fn check_health(&self) -> Result<()> {
        self.state.ensure_live()
    }

    async fn close(&self) -> Result<()> {
        if self.state.close() == Liveness::Closed {
            return Ok(());
        }
        let engine = self.engine.clone();
        // Waits for any call still running on the blocking pool.
        let dropped = tokio::task::spawn_blocking(move || engine.lock().take()).await;
        if let Err(e) = dropped {
            return Err(Error::crashed(self.state.id(), format!("engine teardown failed: {}", e)));
        }
        debug!(instance_id = %self.state.id(), "Direct instance closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgate_engine::fixtures::SampleDocument;
    use docgate_engine::LopdfEngine;
    use docgate_protocol::requests::{DocumentSource, OpenDocument};
    use docgate_protocol::{EngineError, ErrorCode};

    struct PanickingEngine;

    impl Engine for PanickingEngine {
        fn execute(&mut self, _request: Request) -> std::result::Result<Response, EngineError> {
            panic!("engine blew up");
        }

        fn execute_local(
            &mut self,
            _request: LocalRequest,
        ) -> std::result::Result<LocalResponse, EngineError> {
            Ok(LocalResponse::Registered)
        }
    }

    fn open_request(bytes: Vec<u8>) -> Request {
        OpenDocument {
            source: DocumentSource::Bytes(bytes),
            password: None,
        }
        .into()
    }

    #[tokio::test]
    async fn test_invoke_runs_engine() {
        let id = InstanceId::new();
        let context = DirectContext::new(id, LopdfEngine::new(id));
        let bytes = SampleDocument::new(2).build().unwrap();
        let response = context.invoke(open_request(bytes)).await.unwrap();
        assert!(matches!(response, Response::OpenDocument(_)));
    }

    #[tokio::test]
    async fn test_engine_failure_is_not_a_crash() {
        let id = InstanceId::new();
        let context = DirectContext::new(id, LopdfEngine::new(id));
        let err = context.invoke(open_request(b"garbage".to_vec())).await.unwrap_err();
        assert_eq!(err.engine_code(), Some(ErrorCode::Format));
        assert_eq!(context.liveness(), Liveness::Healthy);
    }

    #[tokio::test]
    async fn test_panic_crashes_instance() {
        let context = DirectContext::new(InstanceId::new(), PanickingEngine);
        let err = context.invoke(open_request(Vec::new())).await.unwrap_err();
        assert!(matches!(err, Error::InstanceCrashed { .. }));
        assert_eq!(context.liveness(), Liveness::Crashed);

        // Nothing reaches the engine afterwards.
        let err = context
            .invoke_local(LocalRequest::SetTimeFunction(None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InstanceCrashed { .. }));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let id = InstanceId::new();
        let context = DirectContext::new(id, LopdfEngine::new(id));
        context.close().await.unwrap();
        context.close().await.unwrap();
        assert_eq!(context.liveness(), Liveness::Closed);
        assert!(matches!(
            context.invoke(open_request(Vec::new())).await,
            Err(Error::InstanceClosed(_))
        ));
    }
}
