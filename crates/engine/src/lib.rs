//! # Document Engine
//!
//! The engine is a non-reentrant capability set: one instance owns one engine
//! state and executes one operation at a time. Nothing here schedules or
//! isolates; that is the pool's job.
//!
//! ```text
//! ┌──────────────────────────┐      ┌───────────────────────────┐
//! │ EngineFactory            │────► │ Engine (one per instance) │
//! │  init_library / destroy  │      │  execute(Request)         │
//! └──────────────────────────┘      │  execute_local(Local..)   │
//!                                   └───────────────────────────┘
//! ```
//!
//! `execute` takes transportable requests only. `execute_local` takes the
//! few requests that hold a reader or a callback and therefore only make sense
//! in the caller's own process.

pub mod fault;
pub mod fixtures;
pub mod local;
pub mod pdf;

use docgate_protocol::{EngineError, InstanceId, Request, Response};

pub use fault::{FaultInjectingEngine, FaultInjectingFactory, CRASH_MARKER, STALL_MARKER};
pub use local::{
    LocalOperation, LocalRequest, LocalResponse, LocaltimeFunction, ReadSeek, TimeFunction,
    UnsupportedFeature, UnsupportedObjectHandler,
};
pub use pdf::{LopdfEngine, LopdfEngineFactory};

/// One engine state. Never called concurrently.
pub trait Engine: Send + 'static {
    fn execute(&mut self, request: Request) -> Result<Response, EngineError>;

    fn execute_local(&mut self, request: LocalRequest) -> Result<LocalResponse, EngineError>;
}

/// Creates engines and owns process-wide library setup.
///
/// `init_library` runs when the first direct pool attaches and
/// `destroy_library` when the last one closes. Workers call them once each.
pub trait EngineFactory: Send + Sync + 'static {
    type Engine: Engine;

    fn create(&self, instance: InstanceId) -> Result<Self::Engine, EngineError>;

    fn init_library(&self) {}

    fn destroy_library(&self) {}
}
