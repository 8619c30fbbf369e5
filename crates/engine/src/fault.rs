//! Fault injection for crash and stall testing.
//!
//! Wraps another engine and inspects every document before it is opened.
//! A document containing [`CRASH_MARKER`] aborts the process the way a
//! native engine would on malformed input; [`STALL_MARKER`] blocks the
//! calling thread forever. Only ever enabled in worker processes.

use std::io::{Cursor, Read, Seek, SeekFrom};

use docgate_protocol::requests::DocumentSource;
use docgate_protocol::{EngineError, InstanceId, Request, Response};
use tracing::{error, warn};

use crate::local::{LocalRequest, LocalResponse};
use crate::{Engine, EngineFactory};

pub const CRASH_MARKER: &[u8] = b"%DOCGATE-CRASH";
pub const STALL_MARKER: &[u8] = b"%DOCGATE-STALL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Crash,
    Stall,
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn detect(bytes: &[u8]) -> Option<Fault> {
    if contains(bytes, CRASH_MARKER) {
        Some(Fault::Crash)
    } else if contains(bytes, STALL_MARKER) {
        Some(Fault::Stall)
    } else {
        None
    }
}

pub struct FaultInjectingEngine<E> {
    inner: E,
    instance: InstanceId,
}

impl<E: Engine> FaultInjectingEngine<E> {
    pub fn new(instance: InstanceId, inner: E) -> Self {
        Self { inner, instance }
    }

    pub fn into_inner(self) -> E {
        self.inner
    }

    fn trip(&self, bytes: &[u8]) {
        match detect(bytes) {
            Some(Fault::Crash) => {
                error!(instance_id = %self.instance, "crash marker found, aborting");
                std::process::abort();
            }
            Some(Fault::Stall) => {
                warn!(instance_id = %self.instance, "stall marker found, blocking forever");
                loop {
                    std::thread::park();
                }
            }
            None => {}
        }
    }
}

impl<E: Engine> Engine for FaultInjectingEngine<E> {
    fn execute(&mut self, request: Request) -> Result<Response, EngineError> {
        if let Request::OpenDocument(open) = &request {
            match &open.source {
                DocumentSource::Bytes(bytes) => self.trip(bytes),
                DocumentSource::FilePath(path) => {
                    if let Ok(bytes) = std::fs::read(path) {
                        self.trip(&bytes);
                    }
                }
            }
        }
        self.inner.execute(request)
    }

    fn execute_local(&mut self, request: LocalRequest) -> Result<LocalResponse, EngineError> {
        match request {
            LocalRequest::OpenReader {
                mut reader,
                size,
                password,
            } => {
                reader.seek(SeekFrom::Start(0))?;
                let mut bytes = Vec::new();
                reader.take(size).read_to_end(&mut bytes)?;
                self.trip(&bytes);
                // The declared size is kept so a short reader still fails inside.
                self.inner.execute_local(LocalRequest::OpenReader {
                    size,
                    reader: Box::new(Cursor::new(bytes)),
                    password,
                })
            }
            other => self.inner.execute_local(other),
        }
    }
}

/// Builds fault-injecting engines around another factory's engines.
pub struct FaultInjectingFactory<F> {
    inner: F,
}

impl<F: EngineFactory> FaultInjectingFactory<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<F: EngineFactory> EngineFactory for FaultInjectingFactory<F> {
    type Engine = FaultInjectingEngine<F::Engine>;

    fn create(&self, instance: InstanceId) -> Result<Self::Engine, EngineError> {
        Ok(FaultInjectingEngine::new(instance, self.inner.create(instance)?))
    }

    fn init_library(&self) {
        self.inner.init_library();
    }

    fn destroy_library(&self) {
        self.inner.destroy_library();
    }
}
