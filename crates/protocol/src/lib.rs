// Engine Protocol
//
// Decision: Handles are (instance, arena id, kind) triples, never native addresses
// Decision: Operation payloads are JSON inside a gRPC envelope; the catalog types are the source of truth
// Decision: Nothing in this crate can carry a function value or a stream

pub mod catalog;
pub mod error;
pub mod handles;
pub mod requests;
pub mod responses;
pub mod wire;

// Generated protobuf code
pub mod proto {
    tonic::include_proto!("docgate.engine");
}

pub use catalog::{Call, Operation, Request, Response};
pub use error::{EngineError, ErrorCode};
pub use handles::{
    ActionRef, AnnotationRef, BitmapRef, BookmarkRef, CollectReferences, DestRef, DocumentRef, FontInfoRef,
    HandleKind, InstanceId, LinkRef, PageRef, PageSelector, Reference, SignatureRef, XObjectRef,
};

// Re-export for convenience
pub use proto::engine_service_client::EngineServiceClient;
pub use proto::engine_service_server::{EngineService, EngineServiceServer};
