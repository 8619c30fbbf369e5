//! # Docgate
//!
//! A pool and execution gateway for a non-reentrant, crash-prone document
//! engine.
//!
//! ## Features
//!
//! - **Two pool strategies**: one in-process instance behind a fair lock, or
//!   up to N worker processes with one engine each
//! - **Crash containment**: a worker that dies or stalls fails only the call
//!   it was serving; the pool replaces it
//! - **Instance-scoped handles**: every reference is checked against the
//!   instance that issued it before it reaches the engine
//! - **Graceful shutdown**: holders get a grace period, stragglers are killed
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Pool                                 │
//! │  (acquire deadlines, idle set, crash replacement, shutdown) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ get_instance
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Instance                              │
//! │  (handle validation, registry bookkeeping, cleanup)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ExecutionContext                          │
//! │  DirectContext ──► Engine    IsolatedContext ──► worker     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use docgate::prelude::*;
//! use docgate::protocol::requests::GetPageCount;
//!
//! let pool = create_pool(PoolConfig::isolated(4)).await?;
//! let instance = pool.get_instance(Duration::from_secs(5)).await?;
//! let document = instance.new_document_from_bytes(bytes, []).await?;
//! let pages = instance.call(GetPageCount { document }).await?.page_count;
//! instance.close().await?;
//! pool.close().await?;
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod instance;
pub mod options;
pub mod pool;
pub mod registry;
pub mod telemetry;
pub mod worker;

pub use docgate_engine as engine;
pub use docgate_protocol as protocol;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{PoolConfig, PoolMode, WorkerCommand};
    pub use crate::error::{Error, HandleFault, Result};
    pub use crate::instance::Instance;
    pub use crate::options::{password, DocumentInput, OpenDocumentRequest, OpenOption};
    pub use crate::pool::{create_pool, create_pool_with_factory, Pool, PoolStats, PoolStatus};
    pub use std::time::Duration;
}

// Re-export key types at crate root
pub use config::{PoolConfig, PoolMode, WorkerCommand};
pub use context::{ExecutionContext, Liveness};
pub use error::{Error, HandleFault, Result};
pub use instance::Instance;
pub use options::{DocumentInput, OpenDocumentRequest, OpenOption};
pub use pool::{
    create_pool, create_pool_with_factory, library_users, DirectPool, IsolatedPool, Pool,
    PoolStats, PoolStatus,
};
pub use registry::HandleRegistry;
