// Caller-facing instance gateway
// Decision: Every reference is validated against the instance's registry before the engine sees it
// Decision: Registry bookkeeping follows the reply: released on a successful close, recorded on issue
// Decision: Giving an instance back closes whatever documents the caller left open

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use docgate_engine::{
    LocalRequest, LocalResponse, LocaltimeFunction, ReadSeek, TimeFunction,
    UnsupportedObjectHandler,
};
use docgate_protocol::requests::{self, DocumentSource};
use docgate_protocol::{Call, DocumentRef, InstanceId, Request, Response};
use tracing::{debug, trace, warn};

use crate::config::PoolMode;
use crate::context::{ExecutionContext, Liveness};
use crate::error::{Error, Result};
use crate::options::{buffer_reader, DocumentInput, OpenDocumentRequest, OpenOption};
use crate::pool::Lease;

/// Exclusive use of one engine instance until closed or dropped.
///
/// Handles issued through an instance are only valid on that instance and
/// only until they, their parent, or the instance itself is released.
pub struct Instance {
    context: Arc<dyn ExecutionContext>,
    lease: Option<Box<dyn Lease>>,
}

impl Instance {
    pub(crate) fn new(context: Arc<dyn ExecutionContext>, lease: Box<dyn Lease>) -> Self {
        Self {
            context,
            lease: Some(lease),
        }
    }

    pub fn id(&self) -> InstanceId {
        self.context.id()
    }

    pub fn mode(&self) -> PoolMode {
        self.context.mode()
    }

    pub fn liveness(&self) -> Liveness {
        self.context.liveness()
    }

    /// Documents currently open on this instance, oldest first.
    pub fn documents(&self) -> Vec<DocumentRef> {
        self.context.registry().documents()
    }

    /// Runs one typed catalog operation.
    pub async fn call<C: Call>(&self, request: C) -> Result<C::Response> {
        let response = self.dispatch(request.into_request()).await?;
        C::from_response(response).map_err(|other| {
            Error::Protocol(format!(
                "{} answered with {}",
                C::OPERATION,
                other.operation()
            ))
        })
    }

    /// Runs one untyped catalog operation.
    pub async fn dispatch(&self, request: Request) -> Result<Response> {
        self.ensure_live()?;
        let registry = self.context.registry();
        registry.validate_all(&request.references())?;

        let operation = request.operation();
        let released = request.released();
        let owner = request.derived_owner();
        trace!(instance_id = %self.id(), %operation, "Dispatching");

        let response = self.context.invoke(request).await?;

        if let Some(released) = released {
            let dropped = registry.release(released);
            trace!(instance_id = %self.id(), %released, dropped, "Released handles");
        }
        for issued in response.issued() {
            if issued.instance != self.id() {
                return Err(Error::Protocol(format!(
                    "{} issued {} for another instance",
                    operation, issued
                )));
            }
            let parent = if issued.kind.is_root() { None } else { owner };
            registry.record(issued, parent);
        }
        Ok(response)
    }

    // ========================================================================
    // Opening documents
    // ========================================================================

    pub async fn open_document(&self, request: OpenDocumentRequest) -> Result<DocumentRef> {
        let OpenDocumentRequest { input, password } = request;
        let source = match input {
            DocumentInput::Bytes(bytes) => DocumentSource::Bytes(bytes),
            DocumentInput::FilePath(path) => DocumentSource::FilePath(path),
            DocumentInput::Reader { reader, size } => {
                if self.context.supports_local_callbacks() {
                    return self.open_reader_in_place(reader, size, password).await;
                }
                debug!(instance_id = %self.id(), size, "Buffering reader for worker");
                DocumentSource::Bytes(buffer_reader(reader, size).await?)
            }
        };
        let opened = self.call(requests::OpenDocument { source, password }).await?;
        Ok(opened.document)
    }

    pub async fn new_document_from_bytes(
        &self,
        bytes: Vec<u8>,
        options: impl IntoIterator<Item = OpenOption>,
    ) -> Result<DocumentRef> {
        self.open_document(
            OpenDocumentRequest::new(DocumentInput::Bytes(bytes)).with_options(options),
        )
        .await
    }

    pub async fn new_document_from_file_path(
        &self,
        path: impl Into<PathBuf>,
        options: impl IntoIterator<Item = OpenOption>,
    ) -> Result<DocumentRef> {
        self.open_document(
            OpenDocumentRequest::new(DocumentInput::FilePath(path.into())).with_options(options),
        )
        .await
    }

    /// Opens `size` bytes read from the start of `reader`.
    pub async fn new_document_from_reader<R: ReadSeek + 'static>(
        &self,
        reader: R,
        size: u64,
        options: impl IntoIterator<Item = OpenOption>,
    ) -> Result<DocumentRef> {
        let input = DocumentInput::Reader {
            reader: Box::new(reader),
            size,
        };
        self.open_document(OpenDocumentRequest::new(input).with_options(options))
            .await
    }

    async fn open_reader_in_place(
        &self,
        reader: Box<dyn ReadSeek>,
        size: u64,
        password: Option<String>,
    ) -> Result<DocumentRef> {
        let request = LocalRequest::OpenReader {
            reader,
            size,
            password,
        };
        match self.invoke_local(request).await? {
            LocalResponse::Opened(document) => {
                if document.instance() != self.id() {
                    return Err(Error::Protocol(format!(
                        "OpenReader issued {} for another instance",
                        document.reference()
                    )));
                }
                self.context.registry().record(document.reference(), None);
                Ok(document)
            }
            other => Err(Error::Protocol(format!("OpenReader answered with {:?}", other))),
        }
    }

    pub async fn close_document(&self, document: DocumentRef) -> Result<()> {
        self.call(requests::CloseDocument { document }).await?;
        Ok(())
    }

    // ========================================================================
    // In-process callbacks
    // ========================================================================

    pub async fn set_unsupported_object_handler(
        &self,
        handler: Option<UnsupportedObjectHandler>,
    ) -> Result<()> {
        self.register(LocalRequest::SetUnsupportedObjectHandler(handler))
            .await
    }

    /// Replaces the clock the engine stamps modification dates with.
    pub async fn set_time_function(&self, time: Option<TimeFunction>) -> Result<()> {
        self.register(LocalRequest::SetTimeFunction(time)).await
    }

    pub async fn set_localtime_function(&self, localtime: Option<LocaltimeFunction>) -> Result<()> {
        self.register(LocalRequest::SetLocaltimeFunction(localtime))
            .await
    }

    async fn register(&self, request: LocalRequest) -> Result<()> {
        match self.invoke_local(request).await? {
            LocalResponse::Registered => Ok(()),
            other => Err(Error::Protocol(format!("expected Registered, got {:?}", other))),
        }
    }

    async fn invoke_local(&self, request: LocalRequest) -> Result<LocalResponse> {
        if !self.context.supports_local_callbacks() {
            return Err(Error::ModeUnsupported {
                operation: request.operation().name(),
                mode: self.mode(),
            });
        }
        self.ensure_live()?;
        self.context.invoke_local(request).await
    }

    // ========================================================================
    // Release
    // ========================================================================

    /// Closes the documents still open and hands the instance back.
    ///
    /// The instance goes back to the pool either way; the first cleanup
    /// failure is reported.
    pub async fn close(mut self) -> Result<()> {
        let result = self.close_documents().await;
        self.lease.take();
        result
    }

    async fn close_documents(&self) -> Result<()> {
        if self.liveness().is_terminal() {
            return Ok(());
        }
        let mut result = Ok(());
        for document in self.documents() {
            match self.close_document(document).await {
                Ok(()) => {}
                Err(e @ Error::InstanceCrashed { .. }) => return Err(e),
                Err(e) => {
                    warn!(instance_id = %self.id(), %document, error = %e, "Failed to close document");
                    // Forget it regardless; nothing else can reach it.
                    self.context.registry().release(document.reference());
                    result = result.and(Err(e));
                }
            }
        }
        result
    }

    fn ensure_live(&self) -> Result<()> {
        match self.liveness() {
            Liveness::Crashed => Err(Error::crashed(self.id(), "instance already crashed")),
            Liveness::Closed => Err(Error::InstanceClosed(self.id())),
            Liveness::Spawning | Liveness::Healthy => Ok(()),
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id())
            .field("mode", &self.mode())
            .field("liveness", &self.liveness())
            .finish()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        if self.liveness().is_terminal() || self.context.registry().is_empty() {
            return;
        }

        let context = self.context.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let instance = Instance {
                        context,
                        lease: Some(lease),
                    };
                    let id = instance.id();
                    if let Err(e) = instance.close().await {
                        warn!(instance_id = %id, error = %e, "Cleanup of dropped instance failed");
                    }
                });
            }
            Err(_) => {
                warn!(
                    instance_id = %self.id(),
                    "Instance dropped outside a runtime, open documents were not closed"
                );
            }
        }
    }
}
